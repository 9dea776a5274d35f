use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the order and catalog workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderCancelled {
        order_id: Uuid,
        restored_items: u32,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Stock events (only the checkout paths write stock)
    StockDecremented {
        product_id: Uuid,
        quantity: i32,
    },
    StockRestored {
        product_id: Uuid,
        quantity: i32,
    },

    // Catalog events
    ProductCreated(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a bounded event channel pair.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event. Spawned by the application
/// entry point; downstream consumers (notifications, analytics) would hang
/// off this loop.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "event: order created");
            }
            Event::OrderCancelled {
                order_id,
                restored_items,
            } => {
                info!(order_id = %order_id, restored_items, "event: order cancelled");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(order_id = %order_id, %old_status, %new_status, "event: order status changed");
            }
            Event::StockDecremented {
                product_id,
                quantity,
            } => {
                info!(product_id = %product_id, quantity, "event: stock decremented");
            }
            Event::StockRestored {
                product_id,
                quantity,
            } => {
                info!(product_id = %product_id, quantity, "event: stock restored");
            }
            Event::ProductCreated(product_id) => {
                info!(product_id = %product_id, "event: product created");
            }
        }
    }

    warn!("Event channel closed; event processor exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (sender, mut receiver) = channel(8);
        let order_id = Uuid::new_v4();

        sender
            .send(Event::OrderCreated(order_id))
            .await
            .expect("send event");

        match receiver.recv().await {
            Some(Event::OrderCreated(id)) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_fails_when_receiver_dropped() {
        let (sender, receiver) = channel(1);
        drop(receiver);

        let result = sender.send(Event::ProductCreated(Uuid::new_v4())).await;
        assert!(result.is_err());
    }
}

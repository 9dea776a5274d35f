use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus, PaymentStatus},
        order_address::{self, Entity as OrderAddressEntity},
        order_item::{self, Entity as OrderItemEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Back-office status transition request.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
    /// Carrier reference; recorded when the order ships
    pub tracking_number: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub payment_method: String,
    pub shipping_method: String,
    pub tracking_number: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Order header plus its line items and both address rows.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: OrderResponse,
    pub items: Vec<order_item::Model>,
    pub addresses: Vec<order_address::Model>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Read and back-office mutation paths over the order ledger. Order
/// creation and cancellation live in the checkout service; this one never
/// touches stock.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Retrieves an order with items and addresses, scoped to its owner.
    #[instrument(skip(self), fields(order_id = %order_id, user_id = %user_id))]
    pub async fn get_order_for_user(
        &self,
        order_id: Uuid,
        user_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let db = &*self.db;

        let order_model = OrderEntity::find_by_id(order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        self.load_details(order_model).await
    }

    /// Retrieves any order with items and addresses (back office).
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let db = &*self.db;

        let order_model = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        self.load_details(order_model).await
    }

    /// Resolves a human-facing order number to the internal id.
    #[instrument(skip(self))]
    pub async fn find_order_id_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<Uuid>, ServiceError> {
        let db = &*self.db;

        let order_model = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(db)
            .await?;

        Ok(order_model.map(|m| m.id))
    }

    /// Lists the caller's orders, newest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_orders_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db;
        let page = page.max(1);

        let paginator = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count orders");
            ServiceError::DatabaseError(e)
        })?;

        let orders = paginator.fetch_page(page - 1).await.map_err(|e| {
            error!(error = %e, page, per_page, "Failed to fetch orders page");
            ServiceError::DatabaseError(e)
        })?;

        Ok(OrderListResponse {
            orders: orders.into_iter().map(model_to_response).collect(),
            total,
            page,
            per_page,
        })
    }

    /// Applies a back-office status transition.
    ///
    /// The transition graph is closed: pending → processing → shipped →
    /// delivered, with refunds off shipped/delivered. Cancellation is
    /// refused here because it must restore stock, which only the
    /// cancellation workflow does.
    #[instrument(skip(self, request), fields(order_id = %order_id, new_status = %request.status))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        request: UpdateOrderStatusRequest,
    ) -> Result<OrderResponse, ServiceError> {
        if request.status == OrderStatus::Cancelled {
            return Err(ServiceError::ValidationError(
                "Cancellation must go through the cancellation workflow so stock is restored"
                    .to_string(),
            ));
        }

        let db = &*self.db;
        let now = Utc::now();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to start transaction for status update");
            ServiceError::DatabaseError(e)
        })?;

        let order_model = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                warn!(order_id = %order_id, "Order not found for status update");
                ServiceError::NotFound(format!("Order {} not found", order_id))
            })?;

        let old_status = order_model.status;

        if !old_status.can_transition_to(request.status) {
            return Err(ServiceError::InvalidState(format!(
                "Cannot transition order from {} to {}",
                old_status, request.status
            )));
        }

        let mut order_update: order::ActiveModel = order_model.into();
        order_update.status = Set(request.status);
        order_update.updated_at = Set(Some(now));

        match request.status {
            OrderStatus::Shipped => {
                order_update.shipped_at = Set(Some(now));
                if let Some(tracking) = request.tracking_number {
                    order_update.tracking_number = Set(Some(tracking));
                }
            }
            OrderStatus::Delivered => {
                order_update.delivered_at = Set(Some(now));
            }
            OrderStatus::Refunded => {
                order_update.payment_status = Set(PaymentStatus::Refunded);
            }
            _ => {}
        }

        if let Some(notes) = request.notes {
            order_update.notes = Set(Some(notes));
        }

        let updated_order = order_update.update(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to update order status");
            ServiceError::DatabaseError(e)
        })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit status update transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, old_status = %old_status, new_status = %updated_order.status, "Order status updated");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::OrderStatusChanged {
                    order_id,
                    old_status: old_status.to_string(),
                    new_status: updated_order.status.to_string(),
                })
                .await
            {
                warn!(error = %e, order_id = %order_id, "Failed to send order status changed event");
            }
        }

        Ok(model_to_response(updated_order))
    }

    async fn load_details(&self, order_model: OrderModel) -> Result<OrderDetails, ServiceError> {
        let db = &*self.db;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_model.id))
            .all(db)
            .await?;

        let addresses = OrderAddressEntity::find()
            .filter(order_address::Column::OrderId.eq(order_model.id))
            .all(db)
            .await?;

        Ok(OrderDetails {
            order: model_to_response(order_model),
            items,
            addresses,
        })
    }
}

/// Converts an order model to response format.
fn model_to_response(model: OrderModel) -> OrderResponse {
    OrderResponse {
        id: model.id,
        order_number: model.order_number,
        user_id: model.user_id,
        status: model.status,
        subtotal: model.subtotal,
        tax_amount: model.tax_amount,
        shipping_amount: model.shipping_amount,
        discount_amount: model.discount_amount,
        total_amount: model.total_amount,
        currency: model.currency,
        payment_status: model.payment_status,
        payment_method: model.payment_method,
        shipping_method: model.shipping_method,
        tracking_number: model.tracking_number,
        notes: model.notes,
        created_at: model.created_at,
        updated_at: model.updated_at,
        shipped_at: model.shipped_at,
        delivered_at: model.delivered_at,
    }
}

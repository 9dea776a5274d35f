pub mod checkout;
pub mod health;
pub mod orders;
pub mod products;

use std::sync::Arc;
use std::time::Duration;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    catalog::ProductCatalogService, checkout::CheckoutService, orders::OrderService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<ProductCatalogService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        checkout_txn_timeout: Duration,
    ) -> Self {
        let catalog = Arc::new(ProductCatalogService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            event_sender.clone(),
            checkout_txn_timeout,
        ));
        let orders = Arc::new(OrderService::new(db_pool, Some(event_sender)));

        Self {
            catalog,
            checkout,
            orders,
        }
    }
}

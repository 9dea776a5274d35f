//! Checkout orchestration: the only code path that mutates the order ledger
//! and product stock together.
//!
//! `place_order` re-validates stock inside the transaction (row-locked on
//! Postgres), prices the cart, and writes the order header, both address
//! rows, every line item, and the stock decrements as one unit. Any failure
//! rolls the whole transaction back; partial orders never survive.
//! `cancel_order` is the inverse workflow and restores stock through the
//! same locked access path.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, DbBackend, DbErr,
    EntityTrait, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        order::{self, OrderStatus, PaymentStatus},
        order_address::{self, AddressKind},
        order_item, product,
    },
    errors::{OutOfStockItem, ServiceError},
    events::{Event, EventSender},
    services::pricing::{self, PricingBreakdown, ShippingMethod},
};

const ORDER_NUMBER_PREFIX: &str = "WO";
const ORDER_NUMBER_SUFFIX_LEN: usize = 10;
// No ambiguous 0/O/1/I/L characters; suffix space is ~8.2e14 per second.
const ORDER_NUMBER_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// One cart line as submitted by the storefront. `price` is the unit price
/// the buyer saw; it is carried into the order item rather than re-derived
/// from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartItemInput {
    pub id: Uuid,
    pub name: String,
    pub brand: String,
    pub price: Decimal,
    pub quantity: i32,
    pub image_url: Option<String>,
}

/// Address as submitted by the storefront.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddressInput {
    pub first_name: String,
    pub last_name: String,
    pub company: Option<String>,
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
}

/// Checkout request body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlaceOrderInput {
    pub items: Vec<CartItemInput>,
    pub shipping_address: AddressInput,
    pub billing_address: Option<AddressInput>,
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
    pub shipping_method: ShippingMethod,
    pub notes: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Already-resolved discount rate in [0, 1]; promo-code validation
    /// happens upstream and is not re-checked here.
    #[serde(default)]
    pub discount_rate: Decimal,
}

fn default_payment_method() -> String {
    "card".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Returned to the storefront after a committed checkout.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderConfirmation {
    pub id: Uuid,
    pub order_number: String,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub currency: String,
    pub items_count: usize,
}

/// Returned after a committed cancellation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CancellationResult {
    pub order_id: Uuid,
    /// Line items whose product stock was put back
    pub restored_items: u32,
}

/// Outcome of the transactional phase, carried out of the transaction so
/// events fire only after commit.
struct CreatedOrder {
    order_id: Uuid,
    order_number: String,
    totals: PricingBreakdown,
    currency: String,
    items_count: usize,
    stock_movements: Vec<(Uuid, i32)>,
}

struct CancelledOrder {
    restored_items: u32,
    stock_movements: Vec<(Uuid, i32)>,
}

/// Service owning the checkout and cancellation workflows.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    txn_timeout: Duration,
}

impl CheckoutService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, txn_timeout: Duration) -> Self {
        Self {
            db,
            event_sender,
            txn_timeout,
        }
    }

    /// Places an order for the authenticated user.
    ///
    /// Request-shape validation happens before the transaction opens and has
    /// no side effects. The transactional phase is bounded by the configured
    /// timeout; expiry rolls back and surfaces a retryable failure.
    #[instrument(skip(self, input), fields(user_id = %user_id, item_count = input.items.len()))]
    pub async fn place_order(
        &self,
        user_id: Uuid,
        input: PlaceOrderInput,
    ) -> Result<OrderConfirmation, ServiceError> {
        validate_place_order(&input)?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start checkout transaction");
            ServiceError::OrderCreationFailed
        })?;

        let outcome = tokio::time::timeout(
            self.txn_timeout,
            self.create_order_in_txn(&txn, user_id, &input),
        )
        .await;

        let created = match outcome {
            Ok(Ok(created)) => created,
            Ok(Err(err)) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "Checkout rollback failed");
                }
                counter!("timepiece_checkout.rejected", 1, "code" => err.code());
                return Err(err);
            }
            Err(_) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "Checkout rollback failed");
                }
                error!(timeout = ?self.txn_timeout, "Checkout transaction timed out");
                counter!("timepiece_checkout.timed_out", 1);
                return Err(ServiceError::OrderCreationFailed);
            }
        };

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %created.order_id, "Failed to commit checkout transaction");
            ServiceError::OrderCreationFailed
        })?;

        counter!("timepiece_checkout.orders_placed", 1);

        info!(
            order_id = %created.order_id,
            order_number = %created.order_number,
            total_amount = %created.totals.total_amount,
            "Order placed"
        );

        self.emit(Event::OrderCreated(created.order_id)).await;
        for (product_id, quantity) in &created.stock_movements {
            self.emit(Event::StockDecremented {
                product_id: *product_id,
                quantity: *quantity,
            })
            .await;
        }

        Ok(OrderConfirmation {
            id: created.order_id,
            order_number: created.order_number,
            total_amount: created.totals.total_amount,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            currency: created.currency,
            items_count: created.items_count,
        })
    }

    /// Cancels the user's own order while it has not shipped, restoring the
    /// stock of every line item.
    #[instrument(skip(self), fields(order_id = %order_id, user_id = %requesting_user_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        requesting_user_id: Uuid,
    ) -> Result<CancellationResult, ServiceError> {
        let txn = self.db.begin().await?;

        let outcome = tokio::time::timeout(
            self.txn_timeout,
            self.cancel_order_in_txn(&txn, order_id, requesting_user_id),
        )
        .await;

        let cancelled = match outcome {
            Ok(Ok(cancelled)) => cancelled,
            Ok(Err(err)) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "Cancellation rollback failed");
                }
                return Err(err);
            }
            Err(_) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "Cancellation rollback failed");
                }
                error!(timeout = ?self.txn_timeout, "Cancellation transaction timed out");
                return Err(ServiceError::InternalError(
                    "Cancellation timed out".to_string(),
                ));
            }
        };

        txn.commit().await?;

        counter!("timepiece_checkout.orders_cancelled", 1);
        info!(restored_items = cancelled.restored_items, "Order cancelled");

        self.emit(Event::OrderCancelled {
            order_id,
            restored_items: cancelled.restored_items,
        })
        .await;
        for (product_id, quantity) in &cancelled.stock_movements {
            self.emit(Event::StockRestored {
                product_id: *product_id,
                quantity: *quantity,
            })
            .await;
        }

        Ok(CancellationResult {
            order_id,
            restored_items: cancelled.restored_items,
        })
    }

    async fn create_order_in_txn(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
        input: &PlaceOrderInput,
    ) -> Result<CreatedOrder, ServiceError> {
        // Re-read every product inside the transaction; a stock figure cached
        // before `begin` can be stale under concurrent checkouts.
        let mut shortages: Vec<OutOfStockItem> = Vec::new();
        let mut fulfillable: Vec<(&CartItemInput, product::Model)> =
            Vec::with_capacity(input.items.len());

        for item in &input.items {
            match self.load_product_for_update(txn, item.id).await.map_err(|e| {
                error!(error = %e, product_id = %item.id, "Failed to read product during checkout");
                ServiceError::OrderCreationFailed
            })? {
                None => shortages.push(OutOfStockItem {
                    product_id: item.id,
                    name: item.name.clone(),
                    requested: item.quantity,
                    available: 0,
                }),
                Some(p) if !p.is_active => shortages.push(OutOfStockItem {
                    product_id: p.id,
                    name: p.name.clone(),
                    requested: item.quantity,
                    available: 0,
                }),
                Some(p) if p.stock_quantity < item.quantity => shortages.push(OutOfStockItem {
                    product_id: p.id,
                    name: p.name.clone(),
                    requested: item.quantity,
                    available: p.stock_quantity,
                }),
                Some(p) => fulfillable.push((item, p)),
            }
        }

        // Partial fulfillment is never permitted: one short line aborts all.
        if !shortages.is_empty() {
            return Err(ServiceError::OutOfStock(shortages));
        }

        let lines: Vec<(Decimal, i32)> = input
            .items
            .iter()
            .map(|item| (item.price, item.quantity))
            .collect();
        let totals = pricing::quote(&lines, input.discount_rate, input.shipping_method);

        let order_id = Uuid::new_v4();
        let order_number = generate_order_number();
        let now = Utc::now();

        order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            user_id: Set(user_id),
            status: Set(OrderStatus::Pending),
            subtotal: Set(totals.subtotal),
            tax_amount: Set(totals.tax_amount),
            shipping_amount: Set(totals.shipping_amount),
            discount_amount: Set(totals.discount_amount),
            total_amount: Set(totals.total_amount),
            currency: Set(input.currency.clone()),
            payment_status: Set(PaymentStatus::Pending),
            payment_method: Set(input.payment_method.clone()),
            shipping_method: Set(input.shipping_method.to_string()),
            tracking_number: Set(None),
            notes: Set(input.notes.clone()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            shipped_at: Set(None),
            delivered_at: Set(None),
        }
        .insert(txn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to insert order header");
            ServiceError::OrderCreationFailed
        })?;

        // Exactly one shipping and one billing row per order; billing falls
        // back to a copy of shipping.
        let billing = input
            .billing_address
            .as_ref()
            .unwrap_or(&input.shipping_address);

        for (kind, address) in [
            (AddressKind::Shipping, &input.shipping_address),
            (AddressKind::Billing, billing),
        ] {
            address_row(order_id, kind, address, now)
                .insert(txn)
                .await
                .map_err(|e| {
                    error!(error = %e, order_id = %order_id, "Failed to insert order address");
                    ServiceError::OrderCreationFailed
                })?;
        }

        let mut stock_movements = Vec::with_capacity(fulfillable.len());

        for (item, product_model) in fulfillable {
            // Snapshot name/brand/reference from the row just read so the
            // order stays stable if the catalog entry is later edited.
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product_model.id),
                name: Set(product_model.name.clone()),
                brand: Set(product_model.brand.clone()),
                reference_number: Set(product_model.reference_number.clone()),
                image_url: Set(item.image_url.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.price),
                total_price: Set(item.price * Decimal::from(item.quantity)),
                created_at: Set(now),
            }
            .insert(txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, product_id = %product_model.id, "Failed to insert order item");
                ServiceError::OrderCreationFailed
            })?;

            let remaining = product_model.stock_quantity - item.quantity;
            let product_id = product_model.id;
            let mut product_update: product::ActiveModel = product_model.into();
            product_update.stock_quantity = Set(remaining);
            product_update.update(txn).await.map_err(|e| {
                error!(error = %e, order_id = %order_id, product_id = %product_id, "Failed to decrement stock");
                ServiceError::OrderCreationFailed
            })?;

            stock_movements.push((product_id, item.quantity));
        }

        Ok(CreatedOrder {
            order_id,
            order_number,
            totals,
            currency: input.currency.clone(),
            items_count: input.items.len(),
            stock_movements,
        })
    }

    async fn cancel_order_in_txn(
        &self,
        txn: &DatabaseTransaction,
        order_id: Uuid,
        requesting_user_id: Uuid,
    ) -> Result<CancelledOrder, ServiceError> {
        // Ownership is part of the lookup: someone else's order id reads the
        // same as a nonexistent one.
        let order_model = order::Entity::find_by_id(order_id)
            .filter(order::Column::UserId.eq(requesting_user_id))
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if !order_model.status.allows_cancellation() {
            return Err(ServiceError::InvalidState(format!(
                "Order in status {} cannot be cancelled",
                order_model.status
            )));
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(txn)
            .await?;

        let now = Utc::now();
        let mut restored_items = 0u32;
        let mut stock_movements = Vec::with_capacity(items.len());

        for item in &items {
            // Same locked access path as checkout; stock is never written
            // outside it.
            match self.load_product_for_update(txn, item.product_id).await? {
                Some(product_model) => {
                    let restored = product_model.stock_quantity + item.quantity;
                    let mut product_update: product::ActiveModel = product_model.into();
                    product_update.stock_quantity = Set(restored);
                    product_update.update(txn).await?;

                    restored_items += 1;
                    stock_movements.push((item.product_id, item.quantity));
                }
                None => {
                    // Product rows are never deleted today, but a missing row
                    // must not block the cancellation itself.
                    warn!(product_id = %item.product_id, "Cancelled item references a missing product; stock not restored");
                }
            }
        }

        let mut order_update: order::ActiveModel = order_model.into();
        order_update.status = Set(OrderStatus::Cancelled);
        order_update.updated_at = Set(Some(now));
        order_update.update(txn).await?;

        Ok(CancelledOrder {
            restored_items,
            stock_movements,
        })
    }

    /// Reads a product row for a stock write. On Postgres the row is locked
    /// (`SELECT ... FOR UPDATE`) so concurrent checkouts serialize on it;
    /// SQLite rejects that syntax and its single-writer transactions already
    /// serialize the check-then-write.
    async fn load_product_for_update(
        &self,
        txn: &DatabaseTransaction,
        product_id: Uuid,
    ) -> Result<Option<product::Model>, DbErr> {
        let mut query = product::Entity::find_by_id(product_id);
        if self.db.get_database_backend() == DbBackend::Postgres {
            query = query.lock_exclusive();
        }
        query.one(txn).await
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "Failed to send checkout event");
        }
    }
}

/// Request-shape validation. Runs before any transaction opens; failures
/// here have no side effects.
fn validate_place_order(input: &PlaceOrderInput) -> Result<(), ServiceError> {
    if input.items.is_empty() {
        return Err(ServiceError::EmptyCart);
    }

    // Cart lines are keyed by product: the stock check and decrement both
    // work line-by-line against one row read, so a product split across two
    // lines could pass validation and still oversell.
    let mut seen_products = HashSet::with_capacity(input.items.len());

    for item in &input.items {
        if item.quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "Quantity for '{}' must be at least 1",
                item.name
            )));
        }
        if item.price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Unit price for '{}' must not be negative",
                item.name
            )));
        }
        if !seen_products.insert(item.id) {
            return Err(ServiceError::ValidationError(format!(
                "Product '{}' appears in more than one cart line",
                item.name
            )));
        }
    }

    if input.discount_rate < Decimal::ZERO || input.discount_rate > Decimal::ONE {
        return Err(ServiceError::ValidationError(
            "Discount rate must be between 0 and 1".to_string(),
        ));
    }

    if input.currency.len() != 3 {
        return Err(ServiceError::ValidationError(
            "Currency must be a 3-letter code".to_string(),
        ));
    }

    validate_address(&input.shipping_address, "shipping")?;
    if let Some(billing) = &input.billing_address {
        validate_address(billing, "billing")?;
    }

    Ok(())
}

fn validate_address(address: &AddressInput, scope: &'static str) -> Result<(), ServiceError> {
    let required: [(&'static str, &str); 7] = [
        ("first_name", &address.first_name),
        ("last_name", &address.last_name),
        ("address_line_1", &address.address_line_1),
        ("city", &address.city),
        ("state", &address.state),
        ("postal_code", &address.postal_code),
        ("country", &address.country),
    ];

    match required.iter().find(|(_, value)| value.trim().is_empty()) {
        Some((field, _)) => Err(ServiceError::InvalidAddress { scope, field }),
        None => Ok(()),
    }
}

fn address_row(
    order_id: Uuid,
    kind: AddressKind,
    address: &AddressInput,
    now: chrono::DateTime<Utc>,
) -> order_address::ActiveModel {
    order_address::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        kind: Set(kind),
        first_name: Set(address.first_name.clone()),
        last_name: Set(address.last_name.clone()),
        company: Set(address.company.clone()),
        address_line_1: Set(address.address_line_1.clone()),
        address_line_2: Set(address.address_line_2.clone()),
        city: Set(address.city.clone()),
        state: Set(address.state.clone()),
        postal_code: Set(address.postal_code.clone()),
        country: Set(address.country.clone()),
        phone: Set(address.phone.clone()),
        created_at: Set(now),
    }
}

/// Generates a human-facing order number: UTC timestamp plus a random
/// suffix. Uniqueness is probabilistic by construction; the ledger is not
/// consulted (a unique index backstops the astronomically unlikely clash).
pub fn generate_order_number() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ORDER_NUMBER_SUFFIX_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ORDER_NUMBER_ALPHABET.len());
            ORDER_NUMBER_ALPHABET[idx] as char
        })
        .collect();

    format!(
        "{}-{}-{}",
        ORDER_NUMBER_PREFIX,
        Utc::now().format("%Y%m%d%H%M%S"),
        suffix
    )
}

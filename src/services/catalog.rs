use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::product::{self, Entity as ProductEntity, Model as ProductModel},
    errors::ServiceError,
    events::{Event, EventSender},
};

const MAX_LIMIT: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateProductInput {
    pub name: String,
    pub description: Option<String>,
    pub brand: String,
    pub reference_number: String,
    pub year: Option<i32>,
    pub price: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Initial units available; after creation only the checkout paths
    /// touch stock
    #[serde(default)]
    pub stock_quantity: i32,
    pub image_url: Option<String>,
    #[serde(default = "default_is_active")]
    pub is_active: bool,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_is_active() -> bool {
    true
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductListResponse {
    pub products: Vec<ProductModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Catalog CRUD glue consumed by the storefront and the back office.
#[derive(Clone)]
pub struct ProductCatalogService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl ProductCatalogService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Create a new product listing
    #[instrument(skip(self, input), fields(name = %input.name, brand = %input.brand))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<ProductModel, ServiceError> {
        if input.price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Price must not be negative".to_string(),
            ));
        }
        if input.stock_quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Stock quantity must not be negative".to_string(),
            ));
        }

        let product_id = Uuid::new_v4();
        let now = Utc::now();

        let product_model = product::ActiveModel {
            id: Set(product_id),
            name: Set(input.name),
            description: Set(input.description),
            brand: Set(input.brand),
            reference_number: Set(input.reference_number),
            year: Set(input.year),
            price: Set(input.price),
            currency: Set(input.currency),
            stock_quantity: Set(input.stock_quantity),
            image_url: Set(input.image_url),
            is_active: Set(input.is_active),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.db)
        .await?;

        if let Err(e) = self.event_sender.send(Event::ProductCreated(product_id)).await {
            warn!(error = %e, product_id = %product_id, "Failed to send product created event");
        }

        info!(product_id = %product_id, "Created product");
        Ok(product_model)
    }

    /// Fetch a single product by id
    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<ProductModel, ServiceError> {
        ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    /// List active products, newest first
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<ProductListResponse, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_LIMIT);

        let paginator = ProductEntity::find()
            .filter(product::Column::IsActive.eq(true))
            .order_by_desc(product::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page - 1).await?;

        Ok(ProductListResponse {
            products,
            total,
            page,
            per_page,
        })
    }
}

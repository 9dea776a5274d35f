use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::product,
    errors::ServiceError,
    services::catalog::{CreateProductInput, ProductListResponse},
    ApiResponse, AppState, ListQuery,
};

/// Catalog endpoints: public browsing plus back-office creation
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products).post(create_product))
        .route("/products/:id", get(get_product))
}

/// Browse active products
#[utoipa::path(
    get,
    path = "/api/v1/products",
    summary = "List products",
    params(
        ("page" = Option<u64>, Query, description = "Page number (default: 1)"),
        ("limit" = Option<u64>, Query, description = "Items per page (default: 20)"),
    ),
    responses(
        (status = 200, description = "Products listed", body = ApiResponse<ProductListResponse>),
    ),
    tag = "products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let products = state
        .services
        .catalog
        .list_products(query.page, query.limit)
        .await?;

    Ok(Json(ApiResponse::success(products)))
}

/// Fetch a single product
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    summary = "Get product",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product found", body = ApiResponse<product::Model>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let product_model = state.services.catalog.get_product(product_id).await?;

    Ok(Json(ApiResponse::success(product_model)))
}

/// Create a product listing (back office)
#[utoipa::path(
    post,
    path = "/api/v1/products",
    summary = "Create product",
    request_body = CreateProductInput,
    responses(
        (status = 201, description = "Product created", body = ApiResponse<product::Model>),
        (status = 401, description = "Not authenticated", body = crate::errors::ErrorResponse),
        (status = 403, description = "Administrator role required", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
pub async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateProductInput>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_admin()?;

    let created = state.services.catalog.create_product(payload).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

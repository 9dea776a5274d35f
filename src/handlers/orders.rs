use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::orders::{OrderDetails, OrderListResponse, UpdateOrderStatusRequest},
    ApiResponse, AppState, ListQuery,
};

/// Order listing and back-office endpoints
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", put(update_order_status))
}

// Resolve an order identifier that may be a UUID or an order_number string
async fn resolve_order_id(state: &AppState, id: &str) -> Result<Uuid, ServiceError> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        return Ok(uuid);
    }
    if let Some(uuid) = state
        .services
        .orders
        .find_order_id_by_order_number(id)
        .await?
    {
        return Ok(uuid);
    }
    Err(ServiceError::NotFound(format!("Order {} not found", id)))
}

/// List the caller's orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "Paginated list of the caller's own orders, newest first",
    params(
        ("page" = Option<u64>, Query, description = "Page number (default: 1)"),
        ("limit" = Option<u64>, Query, description = "Items per page (default: 20)"),
    ),
    responses(
        (status = 200, description = "Orders listed", body = ApiResponse<OrderListResponse>),
        (status = 401, description = "Not authenticated", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state
        .services
        .orders
        .list_orders_for_user(user.user_id, query.page, query.limit)
        .await?;

    Ok(Json(ApiResponse::success(orders)))
}

/// Fetch one order with items and addresses
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    description = "Order header with line items and both address rows, addressed by internal id or order number. Admins may fetch any order; customers only their own",
    params(("id" = String, Path, description = "Order id or order number")),
    responses(
        (status = 200, description = "Order found", body = ApiResponse<OrderDetails>),
        (status = 401, description = "Not authenticated", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let order_id = resolve_order_id(&state, &id).await?;

    let details = if user.is_admin() {
        state.services.orders.get_order(order_id).await?
    } else {
        state
            .services
            .orders
            .get_order_for_user(order_id, user.user_id)
            .await?
    };

    Ok(Json(ApiResponse::success(details)))
}

/// Apply a back-office status transition
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    summary = "Update order status",
    description = "Moves an order along pending → processing → shipped → delivered, or refunds it. Cancellation goes through the cancellation endpoint instead",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<crate::services::orders::OrderResponse>),
        (status = 401, description = "Not authenticated", body = crate::errors::ErrorResponse),
        (status = 403, description = "Administrator role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition not allowed from the current status", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_admin()?;

    let updated = state
        .services
        .orders
        .update_order_status(order_id, payload)
        .await?;

    Ok(Json(ApiResponse::success(updated)))
}

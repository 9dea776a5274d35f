use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::checkout::{CancellationResult, OrderConfirmation, PlaceOrderInput},
    AppState,
};

/// Storefront checkout endpoints
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(place_order))
        .route("/orders/:id/cancel", post(cancel_order))
}

/// Body returned after a committed checkout.
#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub success: bool,
    pub order: OrderConfirmation,
}

/// Place an order from the submitted cart
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    summary = "Place order",
    description = "Validates the cart against live stock, prices it, and atomically writes the order, its addresses and items while decrementing inventory",
    request_body = PlaceOrderInput,
    responses(
        (status = 201, description = "Order placed", body = CheckoutResponse),
        (status = 400, description = "Empty cart or invalid address", body = crate::errors::ErrorResponse),
        (status = 401, description = "Not authenticated", body = crate::errors::ErrorResponse),
        (status = 422, description = "One or more items out of stock", body = crate::errors::ErrorResponse),
        (status = 500, description = "Order creation failed; nothing was written", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "checkout"
)]
pub async fn place_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<PlaceOrderInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .checkout
        .place_order(user.user_id, payload)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            success: true,
            order,
        }),
    ))
}

/// Cancel one's own order while it has not shipped
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    summary = "Cancel order",
    description = "Cancels the caller's order while status is pending or processing and restores the stock of every line item",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order cancelled", body = CancellationResult),
        (status = 401, description = "Not authenticated", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order does not exist or belongs to someone else", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order status does not permit cancellation", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "checkout"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<CancellationResult>, ServiceError> {
    let result = state
        .services
        .checkout
        .cancel_order(order_id, user.user_id)
        .await?;

    Ok(Json(result))
}

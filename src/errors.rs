use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

/// Standard error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Unprocessable Entity",
    "code": "OUT_OF_STOCK",
    "message": "One or more items are out of stock",
    "items": [{
        "product_id": "550e8400-e29b-41d4-a716-446655440000",
        "name": "Submariner ref. 5513",
        "requested": 2,
        "available": 1
    }],
    "timestamp": "2025-11-03T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Bad Request")]
    pub error: String,
    /// Machine-checkable error kind
    #[schema(example = "EMPTY_CART")]
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Offending cart lines, present only for stock failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<OutOfStockItem>>,
    /// ISO 8601 timestamp when the error occurred
    #[schema(example = "2025-11-03T10:30:00.000Z")]
    pub timestamp: String,
}

/// One cart line that could not be fulfilled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OutOfStockItem {
    pub product_id: Uuid,
    /// Display name at the time of the attempt (product name when the row
    /// still exists, the client-supplied name otherwise)
    pub name: String,
    pub requested: i32,
    pub available: i32,
}

impl OutOfStockItem {
    pub fn describe(&self) -> String {
        format!(
            "{} (requested {}, available {})",
            self.name, self.requested, self.available
        )
    }
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Missing required field '{field}' in {scope} address")]
    InvalidAddress {
        scope: &'static str,
        field: &'static str,
    },

    #[error("One or more items are out of stock")]
    OutOfStock(Vec<OutOfStockItem>),

    #[error("Order could not be created")]
    OrderCreationFailed,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyCart | Self::InvalidAddress { .. } | Self::ValidationError(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotAuthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidState(_) => StatusCode::CONFLICT,
            Self::OutOfStock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DatabaseError(_) | Self::OrderCreationFailed | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-checkable error kind carried in the response body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::NotAuthenticated(_) => "NOT_AUTHENTICATED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::EmptyCart => "EMPTY_CART",
            Self::InvalidAddress { .. } => "INVALID_ADDRESS",
            Self::OutOfStock(_) => "OUT_OF_STOCK",
            Self::OrderCreationFailed => "ORDER_CREATION_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors answer with generic messages; detail stays in the logs.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::OrderCreationFailed => {
                "Order could not be created; no changes were saved".to_string()
            }
            Self::OutOfStock(items) => {
                let described: Vec<String> = items.iter().map(OutOfStockItem::describe).collect();
                format!("Out of stock: {}", described.join("; "))
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let items = match &self {
            Self::OutOfStock(items) => Some(items.clone()),
            _ => None,
        };

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            items,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Timepiece API",
        version = "0.1.0",
        description = r#"
# Timepiece Vintage Watch Shop API

Storefront and back-office API for a vintage watch shop.

## Checkout

`POST /api/v1/checkout` validates the submitted cart against live stock,
prices it (8% tax on the discounted subtotal, free shipping above 10000),
and atomically writes the order, both address rows and every line item while
decrementing inventory. Stock failures return the full list of offending
items and write nothing.

## Authentication

Endpoints marked with `bearer_auth` require a JWT in the Authorization
header:

```
Authorization: Bearer <your-jwt-token>
```

## Error Handling

Failures carry a machine-checkable `code` (`EMPTY_CART`, `INVALID_ADDRESS`,
`OUT_OF_STOCK`, `ORDER_CREATION_FAILED`, `NOT_FOUND`, `INVALID_STATE`, ...)
next to the human-readable message.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "checkout", description = "Cart checkout and cancellation"),
        (name = "orders", description = "Order listing and back-office transitions"),
        (name = "products", description = "Catalog browsing and management"),
        (name = "health", description = "Health check endpoints")
    ),
    modifiers(&SecurityAddon),
    paths(
        // Checkout
        crate::handlers::checkout::place_order,
        crate::handlers::checkout::cancel_order,

        // Orders
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,

        // Products
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::products::create_product,

        // Health
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::ListQuery,

            // Checkout types
            crate::handlers::checkout::CheckoutResponse,
            crate::services::checkout::PlaceOrderInput,
            crate::services::checkout::CartItemInput,
            crate::services::checkout::AddressInput,
            crate::services::checkout::OrderConfirmation,
            crate::services::checkout::CancellationResult,
            crate::services::pricing::ShippingMethod,

            // Order types
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderDetails,
            crate::services::orders::OrderListResponse,
            crate::services::orders::UpdateOrderStatusRequest,
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentStatus,
            crate::entities::order_item::Model,
            crate::entities::order_address::Model,
            crate::entities::order_address::AddressKind,

            // Product types
            crate::entities::product::Model,
            crate::services::catalog::CreateProductInput,
            crate::services::catalog::ProductListResponse,

            // Health types
            crate::handlers::health::HealthResponse,

            // Error types
            crate::errors::ErrorResponse,
            crate::errors::OutOfStockItem
        )
    )
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

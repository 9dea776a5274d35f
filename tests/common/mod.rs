use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    routing::get,
    Router,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use timepiece_api::{
    auth::AuthService,
    config::AppConfig,
    db,
    entities::product,
    events,
    handlers::AppServices,
    services::catalog::CreateProductInput,
    AppState,
};

/// Helper harness for spinning up an application state backed by a
/// file-based SQLite database (one per test).
pub struct TestApp {
    router: Router,
    pub state: AppState,
    #[allow(dead_code)]
    pub customer_id: Uuid,
    customer_token: String,
    admin_token: String,
    _event_task: tokio::task::JoinHandle<()>,
    _tmp: TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let tmp = TempDir::new().expect("create temp dir for test database");
        let db_file = tmp.path().join("timepiece_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            "test_secret_key_for_testing_purposes_only_32chars".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");

        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_sender, event_rx) = events::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let auth_service = Arc::new(AuthService::new((&cfg).into()));

        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            Duration::from_secs(cfg.checkout_txn_timeout_secs),
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            auth: auth_service.clone(),
            services,
        };

        let customer_id = Uuid::new_v4();
        let customer_token = auth_service
            .issue_token(
                customer_id,
                Some("Test Customer".to_string()),
                vec!["customer".to_string()],
            )
            .expect("issue customer token");

        let admin_token = auth_service
            .issue_token(
                Uuid::new_v4(),
                Some("Test Admin".to_string()),
                vec!["admin".to_string()],
            )
            .expect("issue admin token");

        let router = Router::new()
            .route(
                "/health",
                get(timepiece_api::handlers::health::health_check),
            )
            .nest("/api/v1", timepiece_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            customer_id,
            customer_token,
            admin_token,
            _event_task: event_task,
            _tmp: tmp,
        }
    }

    /// Bearer token for the default customer.
    pub fn token(&self) -> &str {
        &self.customer_token
    }

    /// Bearer token for the back-office admin user.
    #[allow(dead_code)]
    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }

    /// Issue a token for an arbitrary user id (e.g. "someone else").
    #[allow(dead_code)]
    pub fn token_for(&self, user_id: Uuid) -> String {
        self.state
            .auth
            .issue_token(user_id, None, vec!["customer".to_string()])
            .expect("issue token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for authenticated JSON requests as the customer.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    /// Convenience helper for back-office requests.
    #[allow(dead_code)]
    pub async fn request_as_admin(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.admin_token()))
            .await
    }

    /// Seed one catalog product with the given price and stock.
    pub async fn seed_product(
        &self,
        name: &str,
        reference_number: &str,
        price: Decimal,
        stock_quantity: i32,
    ) -> product::Model {
        self.state
            .services
            .catalog
            .create_product(CreateProductInput {
                name: name.to_string(),
                description: Some("Seeded for integration tests".to_string()),
                brand: "Rolex".to_string(),
                reference_number: reference_number.to_string(),
                year: Some(1968),
                price,
                currency: "USD".to_string(),
                stock_quantity,
                image_url: None,
                is_active: true,
            })
            .await
            .expect("seed product for tests")
    }

    /// Current stock for a product, read through the public API.
    pub async fn stock_of(&self, product_id: Uuid) -> i64 {
        let response = self
            .request(
                Method::GET,
                &format!("/api/v1/products/{}", product_id),
                None,
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response_json(response).await;
        body["data"]["stock_quantity"]
            .as_i64()
            .expect("stock_quantity in product response")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Collect a response body as JSON.
pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// A complete, valid shipping address payload.
pub fn shipping_address() -> Value {
    serde_json::json!({
        "first_name": "Grace",
        "last_name": "Hopper",
        "address_line_1": "1 Harbour Front",
        "city": "Portsmouth",
        "state": "VA",
        "postal_code": "23704",
        "country": "US"
    })
}

/// A distinct billing address payload.
#[allow(dead_code)]
pub fn billing_address() -> Value {
    serde_json::json!({
        "first_name": "Grace",
        "last_name": "Hopper",
        "company": "Navy Research",
        "address_line_1": "9 Ledger Street",
        "address_line_2": "Suite 4",
        "city": "Arlington",
        "state": "VA",
        "postal_code": "22201",
        "country": "US"
    })
}

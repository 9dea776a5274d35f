//! End-to-end tests for the checkout workflow: pricing, stock validation,
//! address persistence, and the all-or-nothing transaction guarantee.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use common::{billing_address, response_json, shipping_address, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::{json, Value};
use timepiece_api::entities::{product, Order, OrderAddress, OrderItem};
use timepiece_api::services::checkout::{
    AddressInput, CartItemInput, CheckoutService, PlaceOrderInput,
};
use timepiece_api::services::pricing::ShippingMethod;

fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("decimal serialized as string")
        .parse()
        .expect("parse decimal")
}

fn checkout_payload(product_model: &product::Model, quantity: i32) -> Value {
    json!({
        "items": [{
            "id": product_model.id,
            "name": product_model.name,
            "brand": product_model.brand,
            "price": product_model.price.to_string(),
            "quantity": quantity
        }],
        "shipping_address": shipping_address(),
        "billing_address": null,
        "shipping_method": "standard"
    })
}

// ==================== Pricing & persistence ====================

#[tokio::test]
async fn placing_order_computes_totals_and_decrements_stock() {
    let app = TestApp::new().await;
    let watch = app
        .seed_product("GMT-Master", "ref. 1675", dec!(15000), 3)
        .await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_payload(&watch, 1)),
        )
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;

    assert_eq!(body["success"], json!(true));
    let order = &body["order"];
    assert_eq!(order["status"], json!("pending"));
    assert_eq!(order["payment_status"], json!("pending"));
    assert_eq!(order["currency"], json!("USD"));
    assert_eq!(order["items_count"], json!(1));
    // Over the free-shipping threshold: 15000 + 8% tax, no shipping fee.
    assert_eq!(decimal(&order["total_amount"]), dec!(16200));
    assert!(order["order_number"]
        .as_str()
        .expect("order number")
        .starts_with("WO-"));

    assert_eq!(app.stock_of(watch.id).await, 2);

    // The persisted order carries the full breakdown and the item snapshot.
    let order_id = order["id"].as_str().expect("order id");
    let detail_response = app
        .request_authenticated(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
        .await;
    assert_eq!(detail_response.status(), StatusCode::OK);
    let detail = response_json(detail_response).await;
    let data = &detail["data"];

    assert_eq!(decimal(&data["subtotal"]), dec!(15000));
    assert_eq!(decimal(&data["tax_amount"]), dec!(1200));
    assert_eq!(decimal(&data["shipping_amount"]), Decimal::ZERO);
    assert_eq!(decimal(&data["discount_amount"]), Decimal::ZERO);
    assert_eq!(decimal(&data["total_amount"]), dec!(16200));

    let items = data["items"].as_array().expect("order items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["name"], json!("GMT-Master"));
    assert_eq!(items[0]["brand"], json!("Rolex"));
    assert_eq!(items[0]["reference_number"], json!("ref. 1675"));
    assert_eq!(items[0]["quantity"], json!(1));
    assert_eq!(decimal(&items[0]["total_price"]), dec!(15000));
}

#[tokio::test]
async fn flat_fee_applies_at_the_threshold() {
    let app = TestApp::new().await;
    let watch = app
        .seed_product("Datejust", "ref. 1601", dec!(10000), 5)
        .await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_payload(&watch, 1)),
        )
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;

    // Exactly 10000 still pays the standard fee: 10000 + 150 + 800 tax.
    assert_eq!(decimal(&body["order"]["total_amount"]), dec!(10950));
}

#[tokio::test]
async fn multi_line_cart_prices_every_line() {
    let app = TestApp::new().await;
    let first = app
        .seed_product("Speedmaster", "ref. 105.012", dec!(2400), 4)
        .await;
    let second = app
        .seed_product("Carrera", "ref. 2447", dec!(1800), 2)
        .await;

    let payload = json!({
        "items": [
            {
                "id": first.id,
                "name": first.name,
                "brand": first.brand,
                "price": "2400",
                "quantity": 2
            },
            {
                "id": second.id,
                "name": second.name,
                "brand": second.brand,
                "price": "1800",
                "quantity": 1
            }
        ],
        "shipping_address": shipping_address(),
        "billing_address": null,
        "shipping_method": "express"
    });

    let response = app
        .request_authenticated(Method::POST, "/api/v1/checkout", Some(payload))
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;

    // subtotal 6600, express fee 250, tax 528 -> 7378
    assert_eq!(decimal(&body["order"]["total_amount"]), dec!(7378));
    assert_eq!(body["order"]["items_count"], json!(2));

    assert_eq!(app.stock_of(first.id).await, 2);
    assert_eq!(app.stock_of(second.id).await, 1);
}

// ==================== Stock validation ====================

#[tokio::test]
async fn oversell_is_rejected_with_the_offending_items() {
    let app = TestApp::new().await;
    let watch = app
        .seed_product("Navitimer", "ref. 806", dec!(3200), 2)
        .await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_payload(&watch, 5)),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(response).await;

    assert_eq!(body["code"], json!("OUT_OF_STOCK"));
    let items = body["items"].as_array().expect("offending items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["requested"], json!(5));
    assert_eq!(items[0]["available"], json!(2));
    assert_eq!(items[0]["name"], json!("Navitimer"));

    // Nothing was written: stock unchanged, no orders for the user.
    assert_eq!(app.stock_of(watch.id).await, 2);
    let orders = response_json(
        app.request_authenticated(Method::GET, "/api/v1/orders", None)
            .await,
    )
    .await;
    assert_eq!(orders["data"]["total"], json!(0));
}

#[tokio::test]
async fn one_short_line_aborts_the_entire_cart() {
    let app = TestApp::new().await;
    let plentiful = app
        .seed_product("Seamaster", "ref. 2531.80", dec!(2400), 5)
        .await;
    let scarce = app
        .seed_product("Daytona", "ref. 6239", dec!(48000), 1)
        .await;

    let payload = json!({
        "items": [
            {
                "id": plentiful.id,
                "name": plentiful.name,
                "brand": plentiful.brand,
                "price": "2400",
                "quantity": 2
            },
            {
                "id": scarce.id,
                "name": scarce.name,
                "brand": scarce.brand,
                "price": "48000",
                "quantity": 3
            }
        ],
        "shipping_address": shipping_address(),
        "billing_address": null,
        "shipping_method": "standard"
    });

    let response = app
        .request_authenticated(Method::POST, "/api/v1/checkout", Some(payload))
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(response).await;
    let items = body["items"].as_array().expect("offending items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["name"], json!("Daytona"));

    // Partial fulfillment never happens: the in-stock line was rolled back
    // with everything else.
    assert_eq!(app.stock_of(plentiful.id).await, 5);
    assert_eq!(app.stock_of(scarce.id).await, 1);

    let orders = response_json(
        app.request_authenticated(Method::GET, "/api/v1/orders", None)
            .await,
    )
    .await;
    assert_eq!(orders["data"]["total"], json!(0));
}

#[tokio::test]
async fn unknown_product_reads_as_out_of_stock() {
    let app = TestApp::new().await;

    let payload = json!({
        "items": [{
            "id": uuid::Uuid::new_v4(),
            "name": "Phantom Watch",
            "brand": "Nobody",
            "price": "999",
            "quantity": 1
        }],
        "shipping_address": shipping_address(),
        "billing_address": null,
        "shipping_method": "standard"
    });

    let response = app
        .request_authenticated(Method::POST, "/api/v1/checkout", Some(payload))
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(response).await;
    assert_eq!(body["code"], json!("OUT_OF_STOCK"));
    assert_eq!(body["items"][0]["available"], json!(0));
    assert_eq!(body["items"][0]["name"], json!("Phantom Watch"));
}

#[tokio::test]
async fn sequential_checkouts_cannot_oversell() {
    let app = TestApp::new().await;
    let watch = app
        .seed_product("Monaco", "ref. 1133B", dec!(5200), 3)
        .await;

    let first = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_payload(&watch, 2)),
        )
        .await;
    assert_eq!(first.status(), StatusCode::CREATED);

    // The second buyer re-reads live stock inside the transaction and is
    // refused; combined quantity would exceed what existed.
    let second = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_payload(&watch, 2)),
        )
        .await;
    assert_eq!(second.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(second).await;
    assert_eq!(body["items"][0]["available"], json!(1));

    let stock = app.stock_of(watch.id).await;
    assert_eq!(stock, 1);
    assert!(stock >= 0);
}

// ==================== Atomicity under failure ====================

#[tokio::test]
async fn expired_transaction_leaves_no_rows_behind() {
    let app = TestApp::new().await;
    let watch = app
        .seed_product("Sea-Dweller", "ref. 1665", dec!(21000), 2)
        .await;

    // A timeout that cannot be met fails the transactional phase mid-flight;
    // whatever was written before the expiry must be rolled back.
    let checkout = CheckoutService::new(
        app.state.db.clone(),
        Arc::new(app.state.event_sender.clone()),
        Duration::from_nanos(1),
    );

    let input = PlaceOrderInput {
        items: vec![CartItemInput {
            id: watch.id,
            name: watch.name.clone(),
            brand: watch.brand.clone(),
            price: watch.price,
            quantity: 1,
            image_url: None,
        }],
        shipping_address: AddressInput {
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            company: None,
            address_line_1: "1 Harbour Front".to_string(),
            address_line_2: None,
            city: "Portsmouth".to_string(),
            state: "VA".to_string(),
            postal_code: "23704".to_string(),
            country: "US".to_string(),
            phone: None,
        },
        billing_address: None,
        payment_method: "card".to_string(),
        shipping_method: ShippingMethod::Standard,
        notes: None,
        currency: "USD".to_string(),
        discount_rate: Decimal::ZERO,
    };

    let err = checkout
        .place_order(app.customer_id, input)
        .await
        .expect_err("checkout must fail under an expired timeout");
    assert_eq!(err.code(), "ORDER_CREATION_FAILED");

    let db = &*app.state.db;
    assert_eq!(Order::find().count(db).await.expect("count orders"), 0);
    assert_eq!(
        OrderAddress::find().count(db).await.expect("count addresses"),
        0
    );
    assert_eq!(OrderItem::find().count(db).await.expect("count items"), 0);
    assert_eq!(app.stock_of(watch.id).await, 2);
}

// ==================== Addresses ====================

#[tokio::test]
async fn billing_defaults_to_a_copy_of_shipping() {
    let app = TestApp::new().await;
    let watch = app
        .seed_product("El Primero", "ref. A386", dec!(7600), 2)
        .await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_payload(&watch, 1)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let order_id = response_json(response).await["order"]["id"]
        .as_str()
        .expect("order id")
        .to_string();

    let detail = response_json(
        app.request_authenticated(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
            .await,
    )
    .await;

    let addresses = detail["data"]["addresses"]
        .as_array()
        .expect("order addresses")
        .clone();
    assert_eq!(addresses.len(), 2);

    let shipping = addresses
        .iter()
        .find(|a| a["kind"] == json!("shipping"))
        .expect("shipping row");
    let billing = addresses
        .iter()
        .find(|a| a["kind"] == json!("billing"))
        .expect("billing row");

    // Identical apart from id and kind.
    for field in [
        "first_name",
        "last_name",
        "company",
        "address_line_1",
        "address_line_2",
        "city",
        "state",
        "postal_code",
        "country",
        "phone",
    ] {
        assert_eq!(shipping[field], billing[field], "field {} differs", field);
    }
}

#[tokio::test]
async fn explicit_billing_address_is_persisted() {
    let app = TestApp::new().await;
    let watch = app
        .seed_product("Polerouter", "ref. 20357", dec!(2900), 2)
        .await;

    let mut payload = checkout_payload(&watch, 1);
    payload["billing_address"] = billing_address();

    let response = app
        .request_authenticated(Method::POST, "/api/v1/checkout", Some(payload))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let order_id = response_json(response).await["order"]["id"]
        .as_str()
        .expect("order id")
        .to_string();

    let detail = response_json(
        app.request_authenticated(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
            .await,
    )
    .await;

    let addresses = detail["data"]["addresses"]
        .as_array()
        .expect("order addresses");
    let billing = addresses
        .iter()
        .find(|a| a["kind"] == json!("billing"))
        .expect("billing row");

    assert_eq!(billing["address_line_1"], json!("9 Ledger Street"));
    assert_eq!(billing["city"], json!("Arlington"));
    assert_eq!(billing["company"], json!("Navy Research"));
}

// ==================== Request validation ====================

#[tokio::test]
async fn empty_cart_is_rejected_before_any_write() {
    let app = TestApp::new().await;

    let payload = json!({
        "items": [],
        "shipping_address": shipping_address(),
        "billing_address": null,
        "shipping_method": "standard"
    });

    let response = app
        .request_authenticated(Method::POST, "/api/v1/checkout", Some(payload))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["code"], json!("EMPTY_CART"));
}

#[tokio::test]
async fn missing_address_field_is_named_in_the_error() {
    let app = TestApp::new().await;
    let watch = app
        .seed_product("Reverso", "ref. 250.8.86", dec!(6200), 2)
        .await;

    let mut payload = checkout_payload(&watch, 1);
    payload["shipping_address"]["city"] = json!("");

    let response = app
        .request_authenticated(Method::POST, "/api/v1/checkout", Some(payload))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["code"], json!("INVALID_ADDRESS"));
    assert!(body["message"]
        .as_str()
        .expect("error message")
        .contains("city"));

    assert_eq!(app.stock_of(watch.id).await, 2);
}

#[tokio::test]
async fn checkout_requires_authentication() {
    let app = TestApp::new().await;
    let watch = app
        .seed_product("Memovox", "ref. E855", dec!(4100), 1)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_payload(&watch, 1)),
            None,
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = response_json(response).await;
    assert_eq!(body["code"], json!("NOT_AUTHENTICATED"));

    assert_eq!(app.stock_of(watch.id).await, 1);
}

// ==================== Health ====================

#[tokio::test]
async fn health_reports_up() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/health", None, None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], json!("up"));
    assert_eq!(body["database"], json!("up"));
}

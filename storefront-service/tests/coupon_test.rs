//! Coupon validation and redemption at checkout.

mod common;

use common::{checkout_body, decimal, TestApp};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use storefront_service::models::DiscountType;

#[tokio::test]
async fn percentage_coupon_is_applied_to_items_price() {
    let app = TestApp::spawn().await;
    app.seed_coupon("SAVE10", DiscountType::Percentage, 10, 1000, None)
        .await;
    let product = app.seed_product(1500, 10).await;

    let mut body = checkout_body(&product.id, 1, "COD");
    body["coupon_code"] = json!("save10");
    let order = app.place_order("shopper-1", &body).await;

    assert_eq!(decimal(&order["items_price"]), Decimal::new(1500, 0));
    assert_eq!(decimal(&order["discount_price"]), Decimal::new(150, 0));
    assert_eq!(decimal(&order["shipping_price"]), Decimal::new(100, 0));
    assert_eq!(decimal(&order["total_price"]), Decimal::new(1450, 0));
    assert_eq!(order["coupon_code"], "SAVE10");
}

#[tokio::test]
async fn validate_reports_reason_without_failing() {
    let app = TestApp::spawn().await;
    app.seed_coupon("SAVE10", DiscountType::Percentage, 10, 1000, None)
        .await;

    let below: Value = app
        .post_as(
            "/coupons/validate",
            "shopper-1",
            &json!({ "code": "SAVE10", "order_amount": "500" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(below["valid"], false);
    assert_eq!(below["reason"], "BelowMinimum");

    let unknown: Value = app
        .post_as(
            "/coupons/validate",
            "shopper-1",
            &json!({ "code": "NOPE", "order_amount": "5000" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(unknown["valid"], false);
    assert_eq!(unknown["reason"], "InvalidOrExpired");

    let ok: Value = app
        .post_as(
            "/coupons/validate",
            "shopper-1",
            &json!({ "code": "save10", "order_amount": "1500" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(ok["valid"], true);
    assert_eq!(decimal(&ok["discount_amount"]), Decimal::new(150, 0));
}

#[tokio::test]
async fn rejected_coupon_fails_checkout_without_touching_stock() {
    let app = TestApp::spawn().await;
    app.seed_coupon("BIGSPEND", DiscountType::Fixed, 200, 5000, None)
        .await;
    let product = app.seed_product(1500, 10).await;

    let mut body = checkout_body(&product.id, 1, "COD");
    body["coupon_code"] = json!("BIGSPEND");
    let response = app.post_as("/orders", "shopper-1", &body).await;

    assert_eq!(response.status().as_u16(), 409);
    assert_eq!(app.stock_of(&product.id).await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_use_coupon_is_redeemed_once_under_concurrency() {
    let app = TestApp::spawn().await;
    app.seed_coupon("ONCE", DiscountType::Fixed, 100, 0, Some(1))
        .await;
    let product = app.seed_product(1500, 20).await;

    let attempts = (0..5).map(|i| {
        let mut body = checkout_body(&product.id, 1, "COD");
        body["coupon_code"] = json!("ONCE");
        let app = &app;
        async move { app.post_as("/orders", &format!("shopper-{}", i), &body).await }
    });
    let statuses: Vec<u16> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.status().as_u16())
        .collect();

    assert_eq!(statuses.iter().filter(|s| **s == 201).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == 409).count(), 4);
    assert_eq!(app.stock_of(&product.id).await, 19);
}

#[tokio::test]
async fn coupon_is_once_per_user() {
    let app = TestApp::spawn().await;
    app.seed_coupon("WELCOME", DiscountType::Fixed, 100, 0, None)
        .await;
    let product = app.seed_product(1500, 20).await;

    let mut body = checkout_body(&product.id, 1, "COD");
    body["coupon_code"] = json!("WELCOME");

    app.place_order("repeat", &body).await;
    let again = app.post_as("/orders", "repeat", &body).await;
    assert_eq!(again.status().as_u16(), 409);

    app.place_order("newcomer", &body).await;
}

#[tokio::test]
async fn cancelled_order_frees_its_coupon_use() {
    let app = TestApp::spawn().await;
    app.seed_coupon("ONCE", DiscountType::Fixed, 100, 0, Some(1))
        .await;
    let product = app.seed_product(1500, 20).await;

    let mut body = checkout_body(&product.id, 1, "COD");
    body["coupon_code"] = json!("ONCE");
    let order = app.place_order("first", &body).await;

    app.move_order(order["id"].as_str().unwrap(), &["Cancelled"])
        .await;

    app.place_order("second", &body).await;
}

#[tokio::test]
async fn admin_creates_coupons() {
    let app = TestApp::spawn().await;

    let response = app
        .admin_post(
            "/admin/coupons",
            &json!({
                "code": "summer25",
                "discount_type": "percentage",
                "discount_value": "25",
                "min_order_amount": "1000",
                "expires_at": "2099-01-01T00:00:00Z",
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let coupon: Value = response.json().await.unwrap();
    assert_eq!(coupon["code"], "SUMMER25");
    assert_eq!(coupon["uses_per_user"], 1);

    let duplicate = app
        .admin_post(
            "/admin/coupons",
            &json!({
                "code": "SUMMER25",
                "discount_type": "fixed",
                "discount_value": "10",
                "expires_at": "2099-01-01T00:00:00Z",
            }),
        )
        .await;
    assert_eq!(duplicate.status().as_u16(), 409);

    let forbidden = app
        .post_as(
            "/admin/coupons",
            "shopper-1",
            &json!({
                "code": "FREEBIE",
                "discount_type": "fixed",
                "discount_value": "10",
                "expires_at": "2099-01-01T00:00:00Z",
            }),
        )
        .await;
    assert_eq!(forbidden.status().as_u16(), 403);
}

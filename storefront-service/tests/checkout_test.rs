//! Checkout: server-side pricing and atomic stock reservation.

mod common;

use common::{checkout_body, decimal, TestApp, TestOptions};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde_json::json;

#[tokio::test]
async fn totals_are_computed_from_catalog_prices() {
    let app = TestApp::spawn().await;
    let product = app.seed_product(800, 10).await;

    let mut body = checkout_body(&product.id, 2, "COD");
    body["items"][0]["price"] = json!("1.00");

    let order = app.place_order("shopper-1", &body).await;

    assert_eq!(decimal(&order["items_price"]), Decimal::new(1600, 0));
    assert_eq!(decimal(&order["discount_price"]), Decimal::ZERO);
    assert_eq!(decimal(&order["shipping_price"]), Decimal::new(100, 0));
    assert_eq!(decimal(&order["total_price"]), Decimal::new(1700, 0));
    assert_eq!(order["items"][0]["unit_price"], json!("800"));
    assert_eq!(order["status"], "Pending");
    assert_eq!(order["is_paid"], false);
    assert_eq!(app.stock_of(&product.id).await, 8);
}

#[tokio::test]
async fn shipping_is_free_above_threshold() {
    let app = TestApp::spawn().await;
    let product = app.seed_product(1000, 10).await;

    let order = app
        .place_order("shopper-1", &checkout_body(&product.id, 2, "COD"))
        .await;

    assert_eq!(decimal(&order["shipping_price"]), Decimal::ZERO);
    assert_eq!(decimal(&order["total_price"]), Decimal::new(2000, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_unit_goes_to_exactly_one_buyer() {
    let app = TestApp::spawn().await;
    let product = app.seed_product(500, 1).await;

    let attempts = (0..2).map(|i| {
        let body = checkout_body(&product.id, 1, "COD");
        let app = &app;
        async move { app.post_as("/orders", &format!("racer-{}", i), &body).await }
    });
    let statuses: Vec<u16> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.status().as_u16())
        .collect();

    assert_eq!(statuses.iter().filter(|s| **s == 201).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == 409).count(), 1);
    assert_eq!(app.stock_of(&product.id).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_multi_unit_orders_never_oversell() {
    let app = TestApp::spawn().await;
    let product = app.seed_product(500, 3).await;

    let attempts = (0..2).map(|i| {
        let body = checkout_body(&product.id, 2, "COD");
        let app = &app;
        async move { app.post_as("/orders", &format!("racer-{}", i), &body).await }
    });
    let created = join_all(attempts)
        .await
        .into_iter()
        .filter(|r| r.status().as_u16() == 201)
        .count();

    assert_eq!(created, 1);
    assert_eq!(app.stock_of(&product.id).await, 1);
}

#[tokio::test]
async fn failed_line_releases_earlier_reservations() {
    let app = TestApp::spawn().await;
    let plenty = app.seed_product(500, 5).await;
    let scarce = app.seed_product(700, 1).await;

    let mut body = checkout_body(&plenty.id, 2, "COD");
    body["items"] = json!([
        { "product_id": plenty.id, "size": "M", "color": "White", "quantity": 2 },
        { "product_id": scarce.id, "size": "M", "color": "White", "quantity": 3 },
    ]);

    let response = app.post_as("/orders", "shopper-1", &body).await;

    assert_eq!(response.status().as_u16(), 409);
    assert_eq!(app.stock_of(&plenty.id).await, 5);
    assert_eq!(app.stock_of(&scarce.id).await, 1);
}

#[tokio::test]
async fn unknown_variant_is_not_found() {
    let app = TestApp::spawn().await;
    let product = app.seed_product(500, 5).await;

    let mut body = checkout_body(&product.id, 1, "COD");
    body["items"][0]["color"] = json!("Purple");

    let response = app.post_as("/orders", "shopper-1", &body).await;
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(app.stock_of(&product.id).await, 5);
}

#[tokio::test]
async fn empty_order_is_rejected() {
    let app = TestApp::spawn().await;

    let mut body = checkout_body("anything", 1, "COD");
    body["items"] = json!([]);

    let response = app.post_as("/orders", "shopper-1", &body).await;
    assert_eq!(response.status().as_u16(), 422);
}

#[tokio::test]
async fn checkout_requires_identity() {
    let app = TestApp::spawn().await;
    let product = app.seed_product(500, 5).await;

    let response = app
        .client
        .post(format!("{}/orders", app.address))
        .json(&checkout_body(&product.id, 1, "COD"))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn low_stock_raises_alert() {
    let app = TestApp::spawn_with(TestOptions {
        low_stock_threshold: 2,
        ..TestOptions::default()
    })
    .await;
    let product = app.seed_product(500, 4).await;

    app.place_order("shopper-1", &checkout_body(&product.id, 1, "COD"))
        .await;
    assert_eq!(app.notifications_titled("Low stock").await, 0);

    app.place_order("shopper-1", &checkout_body(&product.id, 1, "COD"))
        .await;
    assert_eq!(app.notifications_titled("Low stock").await, 1);
    assert_eq!(app.notifications_titled("New order").await, 2);
}

#[tokio::test]
async fn orders_are_private_to_their_owner() {
    let app = TestApp::spawn().await;
    let product = app.seed_product(500, 5).await;
    let order = app
        .place_order("owner", &checkout_body(&product.id, 1, "COD"))
        .await;
    let path = format!("/orders/{}", order["id"].as_str().unwrap());

    assert_eq!(app.get_as(&path, "owner").await.status().as_u16(), 200);
    assert_eq!(app.get_as(&path, "someone-else").await.status().as_u16(), 404);
    assert_eq!(app.admin_get(&path).await.status().as_u16(), 200);

    let mine: serde_json::Value = app
        .get_as("/orders/mine", "owner")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(mine.as_array().unwrap().len(), 1);
}

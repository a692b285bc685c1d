//! Post-delivery return workflow.

mod common;

use common::{checkout_body, decimal, TestApp};
use rust_decimal::Decimal;
use serde_json::{json, Value};

async fn delivered_order(app: &TestApp, user_id: &str) -> (String, String) {
    let product = app.seed_product(900, 10).await;
    let order = app
        .place_order(user_id, &checkout_body(&product.id, 2, "COD"))
        .await;
    let order_id = order["id"].as_str().unwrap().to_string();
    app.move_order(&order_id, &["Processing", "Shipped", "Delivered"])
        .await;
    (order_id, product.id)
}

fn return_body(order_id: &str, product_id: &str, quantity: i64) -> Value {
    json!({
        "order_id": order_id,
        "items": [{
            "product_id": product_id,
            "size": "M",
            "color": "White",
            "quantity": quantity,
            "reason": "Does not fit",
            "condition": "Unworn, tags attached",
        }],
    })
}

#[tokio::test]
async fn delivered_order_can_be_returned_once() {
    let app = TestApp::spawn().await;
    let (order_id, product_id) = delivered_order(&app, "returner").await;

    let created = app
        .post_as("/returns", "returner", &return_body(&order_id, &product_id, 1))
        .await;
    assert_eq!(created.status().as_u16(), 201);
    let request: Value = created.json().await.unwrap();
    assert_eq!(request["status"], "Pending");
    assert_eq!(decimal(&request["refund_amount"]), Decimal::ZERO);

    let again = app
        .post_as("/returns", "returner", &return_body(&order_id, &product_id, 1))
        .await;
    assert_eq!(again.status().as_u16(), 409);
    assert_eq!(app.notifications_titled("Return requested").await, 1);
}

#[tokio::test]
async fn undelivered_order_is_not_eligible() {
    let app = TestApp::spawn().await;
    let product = app.seed_product(900, 10).await;
    let order = app
        .place_order("returner", &checkout_body(&product.id, 1, "COD"))
        .await;
    let order_id = order["id"].as_str().unwrap();
    app.move_order(order_id, &["Processing", "Shipped"]).await;

    let response = app
        .post_as("/returns", "returner", &return_body(order_id, &product.id, 1))
        .await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn cannot_return_someone_elses_order() {
    let app = TestApp::spawn().await;
    let (order_id, product_id) = delivered_order(&app, "owner").await;

    let response = app
        .post_as("/returns", "intruder", &return_body(&order_id, &product_id, 1))
        .await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn cannot_return_more_than_ordered() {
    let app = TestApp::spawn().await;
    let (order_id, product_id) = delivered_order(&app, "returner").await;

    let response = app
        .post_as("/returns", "returner", &return_body(&order_id, &product_id, 3))
        .await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn admin_reviews_and_refunds() {
    let app = TestApp::spawn().await;
    let (order_id, product_id) = delivered_order(&app, "returner").await;
    let request: Value = app
        .post_as("/returns", "returner", &return_body(&order_id, &product_id, 2))
        .await
        .json()
        .await
        .unwrap();
    let path = format!("/admin/returns/{}", request["id"].as_str().unwrap());

    let approved: Value = app
        .admin_patch(&path, &json!({ "status": "Approved", "admin_note": "Received" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(approved["status"], "Approved");
    assert_eq!(approved["admin_note"], "Received");

    let refunded: Value = app
        .admin_patch(&path, &json!({ "status": "Refunded", "refund_amount": "1800" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(refunded["status"], "Refunded");
    assert_eq!(decimal(&refunded["refund_amount"]), Decimal::new(1800, 0));

    let reopened = app
        .admin_patch(&path, &json!({ "status": "Pending" }))
        .await;
    assert_eq!(reopened.status().as_u16(), 409);

    let shopper_review = app
        .client
        .patch(format!("{}{}", app.address, path))
        .header("X-User-ID", "returner")
        .json(&json!({ "status": "Refunded" }))
        .send()
        .await
        .unwrap();
    assert_eq!(shopper_review.status().as_u16(), 403);
}

#[tokio::test]
async fn shoppers_list_only_their_returns() {
    let app = TestApp::spawn().await;
    let (first_order, first_product) = delivered_order(&app, "alice").await;
    let (second_order, second_product) = delivered_order(&app, "bob").await;

    app.post_as("/returns", "alice", &return_body(&first_order, &first_product, 1))
        .await;
    app.post_as("/returns", "bob", &return_body(&second_order, &second_product, 1))
        .await;

    let alice: Value = app.get_as("/returns", "alice").await.json().await.unwrap();
    assert_eq!(alice.as_array().unwrap().len(), 1);
    assert_eq!(alice[0]["user_id"], "alice");

    let all: Value = app.admin_get("/returns").await.json().await.unwrap();
    assert_eq!(all.as_array().unwrap().len(), 2);
}

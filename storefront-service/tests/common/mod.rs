#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::{redirect::Policy, Client, Response};
use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::config as core_config;
use storefront_service::config::{
    Config, EsewaConfig, InventoryConfig, KhaltiConfig, NotificationConfig, ServerConfig,
    ShippingConfig, SmtpConfig, StorageConfig,
};
use storefront_service::models::{Coupon, DiscountType, Product, Variant};
use storefront_service::{AppState, Application};
use uuid::Uuid;
use wiremock::MockServer;

pub const ADMIN_ID: &str = "admin-1";
pub const FRONTEND_URL: &str = "http://shop.test";
pub const ESEWA_SECRET: &str = "8gBm/:&EnhH.1/q";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub state: AppState,
    pub client: Client,
    /// Stands in for both payment gateways.
    pub gateway: MockServer,
}

pub struct TestOptions {
    pub esewa_verify_with_lookup: bool,
    pub low_stock_threshold: i64,
    pub notification_queue: usize,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            esewa_verify_with_lookup: true,
            low_stock_threshold: 2,
            notification_queue: 1024,
        }
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(TestOptions::default()).await
    }

    pub async fn spawn_with(options: TestOptions) -> Self {
        let gateway = MockServer::start().await;

        let config = Config {
            common: core_config::Config::default(),
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            storage: StorageConfig::Memory,
            inventory: InventoryConfig {
                low_stock_threshold: options.low_stock_threshold,
            },
            shipping: ShippingConfig {
                flat_rate: Decimal::new(100, 0),
                free_shipping_threshold: Decimal::new(2000, 0),
                carrier: "Test Courier".to_string(),
                label_base_url: "https://labels.test".to_string(),
            },
            notifications: NotificationConfig {
                queue_capacity: options.notification_queue,
                page_size: 50,
            },
            esewa: EsewaConfig {
                product_code: "EPAYTEST".to_string(),
                secret_key: Secret::new(ESEWA_SECRET.to_string()),
                form_url: format!("{}/esewa/form", gateway.uri()),
                status_url: format!("{}/esewa/status", gateway.uri()),
                verify_with_lookup: options.esewa_verify_with_lookup,
                timeout_secs: 1,
            },
            khalti: KhaltiConfig {
                secret_key: Secret::new("test-khalti-key".to_string()),
                api_base_url: format!("{}/khalti", gateway.uri()),
                website_url: FRONTEND_URL.to_string(),
                timeout_secs: 1,
            },
            smtp: SmtpConfig {
                host: "localhost".to_string(),
                port: 2525,
                user: String::new(),
                password: Secret::new(String::new()),
                from_email: "noreply@shop.test".to_string(),
                from_name: "Test Shop".to_string(),
                enabled: false,
            },
            frontend_url: FRONTEND_URL.to_string(),
            public_url: "http://api.shop.test".to_string(),
            service_name: "storefront-service-test".to_string(),
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let port = app.port();
        let state = app.state();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = Client::builder()
            .redirect(Policy::none())
            .build()
            .expect("Failed to build HTTP client");

        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            state,
            client,
            gateway,
        }
    }

    pub async fn seed_product(&self, price: i64, stock: i64) -> Product {
        let product = Product {
            id: Uuid::new_v4().to_string(),
            name: "Linen Shirt".to_string(),
            image: "/img/shirt.png".to_string(),
            price: Decimal::new(price, 0),
            variants: vec![Variant {
                size: "M".to_string(),
                color: "White".to_string(),
                stock,
            }],
            created_at: Utc::now(),
        };
        self.state
            .repositories
            .products
            .insert_product(product.clone())
            .await
            .expect("Failed to seed product");
        product
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: DiscountType,
        value: i64,
        min_order: i64,
        max_uses: Option<u32>,
    ) -> Coupon {
        let coupon = Coupon {
            id: Uuid::new_v4().to_string(),
            code: Coupon::normalize_code(code),
            discount_type,
            discount_value: Decimal::new(value, 0),
            min_order_amount: Decimal::new(min_order, 0),
            max_uses,
            uses_per_user: 1,
            expires_at: Utc::now() + ChronoDuration::days(7),
            is_active: true,
            created_at: Utc::now(),
        };
        self.state
            .repositories
            .coupons
            .insert_coupon(coupon.clone())
            .await
            .expect("Failed to seed coupon");
        coupon
    }

    pub async fn stock_of(&self, product_id: &str) -> i64 {
        self.state
            .repositories
            .products
            .get_product(product_id)
            .await
            .expect("Failed to load product")
            .and_then(|p| p.variant("M", "White").map(|v| v.stock))
            .expect("Variant missing")
    }

    pub async fn get_as(&self, path: &str, user_id: &str) -> Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .header("X-User-ID", user_id)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_as(&self, path: &str, user_id: &str, body: &Value) -> Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .header("X-User-ID", user_id)
            .header("X-User-Email", format!("{}@shop.test", user_id))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn admin_post(&self, path: &str, body: &Value) -> Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .header("X-User-ID", ADMIN_ID)
            .header("X-User-Role", "admin")
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn admin_patch(&self, path: &str, body: &Value) -> Response {
        self.client
            .patch(format!("{}{}", self.address, path))
            .header("X-User-ID", ADMIN_ID)
            .header("X-User-Role", "admin")
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn admin_get(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .header("X-User-ID", ADMIN_ID)
            .header("X-User-Role", "admin")
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Place an order and return the response body; panics unless 201.
    pub async fn place_order(&self, user_id: &str, body: &Value) -> Value {
        let response = self.post_as("/orders", user_id, body).await;
        assert_eq!(response.status().as_u16(), 201, "checkout failed");
        response.json().await.expect("Failed to parse order")
    }

    pub async fn move_order(&self, order_id: &str, statuses: &[&str]) {
        for status in statuses {
            let response = self
                .admin_patch(
                    &format!("/admin/orders/{}/status", order_id),
                    &json!({ "status": status }),
                )
                .await;
            assert!(response.status().is_success(), "transition to {} failed", status);
        }
    }

    /// Wait for queued notifications to be stored, then count those titled `title`.
    pub async fn notifications_titled(&self, title: &str) -> usize {
        self.state.notifier.flush().await;
        self.state
            .repositories
            .notifications
            .list_notifications(1000)
            .await
            .expect("Failed to list notifications")
            .into_iter()
            .filter(|n| n.title == title)
            .count()
    }
}

pub fn checkout_body(product_id: &str, quantity: i64, method: &str) -> Value {
    json!({
        "items": [{
            "product_id": product_id,
            "size": "M",
            "color": "White",
            "quantity": quantity,
        }],
        "shipping_address": {
            "full_name": "Sita Sharma",
            "phone": "9800000000",
            "address": "Lazimpat 12",
            "city": "Kathmandu",
            "postal_code": "44600",
            "country": "Nepal",
        },
        "payment_method": method,
    })
}

pub fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("money is serialized as a string")
        .parse()
        .expect("invalid decimal")
}

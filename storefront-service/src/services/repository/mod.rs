//! Storage seams for the storefront aggregates.
//!
//! Every mutation that races between concurrent requests is expressed as a
//! single conditional update so that both backends give the same guarantees:
//! stock is decremented only when `stock >= quantity`, an order is marked paid
//! only while `is_paid == false`, and status changes compare-and-set on the
//! current status.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;

use crate::models::{
    Coupon, Notification, Order, OrderStatus, PaymentResult, Product, ReturnRequest, ReturnStatus,
    ShippingLabel, VariantKey,
};

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Result of a conditional stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockUpdate {
    Applied { remaining: i64 },
    Insufficient { available: i64 },
    VariantNotFound,
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn insert_product(&self, product: Product) -> Result<(), AppError>;

    async fn get_product(&self, id: &str) -> Result<Option<Product>, AppError>;

    /// Atomically subtract `quantity` from the variant if enough stock remains.
    async fn decrement_stock(
        &self,
        key: &VariantKey,
        quantity: i64,
    ) -> Result<StockUpdate, AppError>;

    async fn increment_stock(&self, key: &VariantKey, quantity: i64) -> Result<(), AppError>;
}

#[async_trait]
pub trait CouponRepository: Send + Sync {
    async fn insert_coupon(&self, coupon: Coupon) -> Result<(), AppError>;

    /// Lookup by already-normalised code.
    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>, AppError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert_order(&self, order: Order) -> Result<(), AppError>;

    async fn get_order(&self, id: &str) -> Result<Option<Order>, AppError>;

    async fn list_orders_for_user(&self, user_id: &str) -> Result<Vec<Order>, AppError>;

    async fn list_orders(&self, limit: i64) -> Result<Vec<Order>, AppError>;

    /// Count non-cancelled orders carrying `code`, optionally for one user.
    async fn count_coupon_uses(&self, code: &str, user_id: Option<&str>) -> Result<u64, AppError>;

    /// Mark an unpaid, non-cancelled order as paid and move it to `Processing`.
    /// Returns `false` when the order was already paid (or not eligible).
    async fn mark_paid(
        &self,
        id: &str,
        result: PaymentResult,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Compare-and-set the status. Delivery also stamps `delivered_at`, and
    /// settles cash-on-delivery orders as paid.
    async fn transition_status(
        &self,
        id: &str,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn set_shipping_label(&self, id: &str, label: ShippingLabel) -> Result<bool, AppError>;

    /// Record the gateway handle for an unpaid order.
    async fn set_payment_reference(&self, id: &str, reference: &str) -> Result<bool, AppError>;
}

#[async_trait]
pub trait ReturnRepository: Send + Sync {
    /// Returns `false` if a request for the same order already exists.
    async fn insert_return(&self, request: ReturnRequest) -> Result<bool, AppError>;

    async fn get_return(&self, id: &str) -> Result<Option<ReturnRequest>, AppError>;

    async fn find_return_for_order(&self, order_id: &str)
        -> Result<Option<ReturnRequest>, AppError>;

    async fn list_returns(&self, user_id: Option<&str>) -> Result<Vec<ReturnRequest>, AppError>;

    async fn update_return(
        &self,
        id: &str,
        from: ReturnStatus,
        to: ReturnStatus,
        refund_amount: Decimal,
        admin_note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert_notification(&self, notification: Notification) -> Result<(), AppError>;

    /// Newest first.
    async fn list_notifications(&self, limit: i64) -> Result<Vec<Notification>, AppError>;

    async fn count_unread(&self) -> Result<u64, AppError>;

    async fn mark_read(&self, id: &str) -> Result<bool, AppError>;

    async fn mark_all_read(&self) -> Result<u64, AppError>;
}

/// Handles to every repository, shared across services.
#[derive(Clone)]
pub struct Repositories {
    pub products: Arc<dyn ProductRepository>,
    pub coupons: Arc<dyn CouponRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub returns: Arc<dyn ReturnRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
}

impl Repositories {
    pub fn memory() -> Self {
        Self::from_store(Arc::new(MemoryStore::new()))
    }

    pub async fn mongo(db: &mongodb::Database) -> Result<Self, AppError> {
        let store = MongoStore::new(db);
        store.init_indexes().await?;
        Ok(Self::from_store(Arc::new(store)))
    }

    fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ProductRepository
            + CouponRepository
            + OrderRepository
            + ReturnRepository
            + NotificationRepository
            + 'static,
    {
        Self {
            products: store.clone(),
            coupons: store.clone(),
            orders: store.clone(),
            returns: store.clone(),
            notifications: store,
        }
    }
}

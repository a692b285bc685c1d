//! In-process store backed by `DashMap`.
//!
//! Mutations run while holding the entry's shard lock, which gives the same
//! per-document atomicity the MongoDB conditional updates provide.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use service_core::error::AppError;

use super::{
    CouponRepository, NotificationRepository, OrderRepository, ProductRepository,
    ReturnRepository, StockUpdate,
};
use crate::models::{
    Coupon, Notification, Order, OrderStatus, PaymentMethod, PaymentResult, Product,
    ReturnRequest, ReturnStatus, ShippingLabel, VariantKey,
};

#[derive(Default)]
pub struct MemoryStore {
    products: DashMap<String, Product>,
    coupons: DashMap<String, Coupon>,
    orders: DashMap<String, Order>,
    /// Keyed by order id: at most one return per order.
    returns: DashMap<String, ReturnRequest>,
    notifications: DashMap<String, Notification>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProductRepository for MemoryStore {
    async fn insert_product(&self, product: Product) -> Result<(), AppError> {
        match self.products.entry(product.id.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict(anyhow::anyhow!(
                "Product {} already exists",
                product.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(product);
                Ok(())
            }
        }
    }

    async fn get_product(&self, id: &str) -> Result<Option<Product>, AppError> {
        Ok(self.products.get(id).map(|p| p.clone()))
    }

    async fn decrement_stock(
        &self,
        key: &VariantKey,
        quantity: i64,
    ) -> Result<StockUpdate, AppError> {
        let Some(mut product) = self.products.get_mut(&key.product_id) else {
            return Ok(StockUpdate::VariantNotFound);
        };
        let Some(variant) = product.variant_mut(&key.size, &key.color) else {
            return Ok(StockUpdate::VariantNotFound);
        };

        if variant.stock < quantity {
            return Ok(StockUpdate::Insufficient {
                available: variant.stock,
            });
        }

        variant.stock -= quantity;
        Ok(StockUpdate::Applied {
            remaining: variant.stock,
        })
    }

    async fn increment_stock(&self, key: &VariantKey, quantity: i64) -> Result<(), AppError> {
        let mut product = self.products.get_mut(&key.product_id).ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Product {} not found", key.product_id))
        })?;
        let variant = product
            .variant_mut(&key.size, &key.color)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Variant {} not found", key)))?;
        variant.stock += quantity;
        Ok(())
    }
}

#[async_trait]
impl CouponRepository for MemoryStore {
    async fn insert_coupon(&self, coupon: Coupon) -> Result<(), AppError> {
        match self.coupons.entry(coupon.code.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict(anyhow::anyhow!(
                "Coupon {} already exists",
                coupon.code
            ))),
            Entry::Vacant(slot) => {
                slot.insert(coupon);
                Ok(())
            }
        }
    }

    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>, AppError> {
        Ok(self.coupons.get(code).map(|c| c.clone()))
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert_order(&self, order: Order) -> Result<(), AppError> {
        self.orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>, AppError> {
        Ok(self.orders.get(id).map(|o| o.clone()))
    }

    async fn list_orders_for_user(&self, user_id: &str) -> Result<Vec<Order>, AppError> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .map(|o| o.clone())
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn list_orders(&self, limit: i64) -> Result<Vec<Order>, AppError> {
        let mut orders: Vec<Order> = self.orders.iter().map(|o| o.clone()).collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders.truncate(limit.max(0) as usize);
        Ok(orders)
    }

    async fn count_coupon_uses(&self, code: &str, user_id: Option<&str>) -> Result<u64, AppError> {
        let count = self
            .orders
            .iter()
            .filter(|o| o.coupon_code.as_deref() == Some(code))
            .filter(|o| o.status != OrderStatus::Cancelled)
            .filter(|o| user_id.is_none_or(|uid| o.user_id == uid))
            .count();
        Ok(count as u64)
    }

    async fn mark_paid(
        &self,
        id: &str,
        result: PaymentResult,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let Some(mut order) = self.orders.get_mut(id) else {
            return Ok(false);
        };
        if order.is_paid
            || !matches!(order.status, OrderStatus::Pending | OrderStatus::Processing)
        {
            return Ok(false);
        }

        order.is_paid = true;
        order.paid_at = Some(paid_at);
        order.status = OrderStatus::Processing;
        order.payment_result = Some(result);
        order.updated_at = paid_at;
        Ok(true)
    }

    async fn transition_status(
        &self,
        id: &str,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let Some(mut order) = self.orders.get_mut(id) else {
            return Ok(false);
        };
        if order.status != from {
            return Ok(false);
        }

        order.status = to;
        order.updated_at = at;
        if to == OrderStatus::Delivered {
            order.is_delivered = true;
            order.delivered_at = Some(at);
            if order.payment_method == PaymentMethod::CashOnDelivery && !order.is_paid {
                order.is_paid = true;
                order.paid_at = Some(at);
            }
        }
        Ok(true)
    }

    async fn set_shipping_label(&self, id: &str, label: ShippingLabel) -> Result<bool, AppError> {
        let Some(mut order) = self.orders.get_mut(id) else {
            return Ok(false);
        };
        order.shipping_label = Some(label);
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_payment_reference(&self, id: &str, reference: &str) -> Result<bool, AppError> {
        let Some(mut order) = self.orders.get_mut(id) else {
            return Ok(false);
        };
        if order.is_paid {
            return Ok(false);
        }
        order.payment_reference = Some(reference.to_string());
        order.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl ReturnRepository for MemoryStore {
    async fn insert_return(&self, request: ReturnRequest) -> Result<bool, AppError> {
        match self.returns.entry(request.order_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(request);
                Ok(true)
            }
        }
    }

    async fn get_return(&self, id: &str) -> Result<Option<ReturnRequest>, AppError> {
        Ok(self
            .returns
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.clone()))
    }

    async fn find_return_for_order(
        &self,
        order_id: &str,
    ) -> Result<Option<ReturnRequest>, AppError> {
        Ok(self.returns.get(order_id).map(|r| r.clone()))
    }

    async fn list_returns(&self, user_id: Option<&str>) -> Result<Vec<ReturnRequest>, AppError> {
        let mut requests: Vec<ReturnRequest> = self
            .returns
            .iter()
            .filter(|r| user_id.is_none_or(|uid| r.user_id == uid))
            .map(|r| r.clone())
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn update_return(
        &self,
        id: &str,
        from: ReturnStatus,
        to: ReturnStatus,
        refund_amount: Decimal,
        admin_note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let Some(mut request) = self.returns.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        if request.status != from {
            return Ok(false);
        }

        request.status = to;
        request.refund_amount = refund_amount;
        if admin_note.is_some() {
            request.admin_note = admin_note;
        }
        request.updated_at = at;
        Ok(true)
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn insert_notification(&self, notification: Notification) -> Result<(), AppError> {
        self.notifications
            .insert(notification.id.clone(), notification);
        Ok(())
    }

    async fn list_notifications(&self, limit: i64) -> Result<Vec<Notification>, AppError> {
        let mut notifications: Vec<Notification> =
            self.notifications.iter().map(|n| n.clone()).collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        notifications.truncate(limit.max(0) as usize);
        Ok(notifications)
    }

    async fn count_unread(&self) -> Result<u64, AppError> {
        Ok(self.notifications.iter().filter(|n| !n.is_read).count() as u64)
    }

    async fn mark_read(&self, id: &str) -> Result<bool, AppError> {
        match self.notifications.get_mut(id) {
            Some(mut notification) => {
                notification.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_read(&self) -> Result<u64, AppError> {
        let mut updated = 0;
        for mut notification in self.notifications.iter_mut() {
            if !notification.is_read {
                notification.is_read = true;
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Variant;

    fn product(stock: i64) -> Product {
        Product {
            id: "p1".to_string(),
            name: "Tee".to_string(),
            image: "/img/tee.png".to_string(),
            price: Decimal::new(500, 0),
            variants: vec![Variant {
                size: "M".to_string(),
                color: "Red".to_string(),
                stock,
            }],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn decrement_refuses_to_go_negative() {
        let store = MemoryStore::new();
        store.insert_product(product(2)).await.unwrap();
        let key = VariantKey::new("p1", "M", "Red");

        assert_eq!(
            store.decrement_stock(&key, 3).await.unwrap(),
            StockUpdate::Insufficient { available: 2 }
        );
        assert_eq!(
            store.decrement_stock(&key, 2).await.unwrap(),
            StockUpdate::Applied { remaining: 0 }
        );
    }

    #[tokio::test]
    async fn unknown_variant_is_reported() {
        let store = MemoryStore::new();
        store.insert_product(product(2)).await.unwrap();

        let key = VariantKey::new("p1", "XL", "Red");
        assert_eq!(
            store.decrement_stock(&key, 1).await.unwrap(),
            StockUpdate::VariantNotFound
        );
        let key = VariantKey::new("missing", "M", "Red");
        assert_eq!(
            store.decrement_stock(&key, 1).await.unwrap(),
            StockUpdate::VariantNotFound
        );
    }
}

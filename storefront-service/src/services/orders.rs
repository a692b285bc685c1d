//! Order placement and the administrative order lifecycle.

use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    LineItem, Order, OrderStatus, PaymentMethod, Principal, ShippingAddress, VariantKey,
};
use crate::services::coupon::CouponEvaluator;
use crate::services::inventory::{InventoryError, InventoryLedger};
use crate::services::metrics;
use crate::services::notifications::{NewNotification, Notifier};
use crate::services::repository::{OrderRepository, ProductRepository};
use crate::services::shipping::ShippingProvider;

/// One requested line. `claimed_unit_price` is whatever the client sent and
/// is never used for pricing.
#[derive(Debug, Clone)]
pub struct CheckoutLine {
    pub product_id: String,
    pub size: String,
    pub color: String,
    pub quantity: i64,
    pub claimed_unit_price: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct Checkout {
    pub lines: Vec<CheckoutLine>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceBreakdown {
    pub items_price: Decimal,
    pub discount_price: Decimal,
    pub shipping_price: Decimal,
    pub total_price: Decimal,
}

impl PriceBreakdown {
    pub fn new(items_price: Decimal, discount_price: Decimal, shipping_price: Decimal) -> Self {
        Self {
            items_price,
            discount_price,
            shipping_price,
            total_price: items_price - discount_price + shipping_price,
        }
    }
}

#[derive(Clone)]
pub struct OrderService {
    products: Arc<dyn ProductRepository>,
    orders: Arc<dyn OrderRepository>,
    inventory: InventoryLedger,
    coupons: CouponEvaluator,
    shipping: Arc<dyn ShippingProvider>,
    notifier: Notifier,
}

impl OrderService {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        orders: Arc<dyn OrderRepository>,
        inventory: InventoryLedger,
        coupons: CouponEvaluator,
        shipping: Arc<dyn ShippingProvider>,
        notifier: Notifier,
    ) -> Self {
        Self {
            products,
            orders,
            inventory,
            coupons,
            shipping,
            notifier,
        }
    }

    /// Price, reserve and persist an order in `Pending`.
    ///
    /// Stock reserved by this call is released again if anything after the
    /// first reservation fails, so no decrement outlives a failed checkout.
    pub async fn place_order(
        &self,
        principal: &Principal,
        checkout: Checkout,
    ) -> Result<Order, AppError> {
        let result = self.place_order_inner(principal, checkout).await;
        if let Err(e) = &result {
            let reason = match e {
                AppError::Conflict(_) => "conflict",
                AppError::NotFound(_) => "not_found",
                AppError::BadRequest(_) | AppError::ValidationError(_) => "invalid",
                _ => "error",
            };
            metrics::record_order_rejected(reason);
            tracing::info!(user_id = %principal.user_id, error = %e, "Checkout rejected");
        }
        result
    }

    async fn place_order_inner(
        &self,
        principal: &Principal,
        checkout: Checkout,
    ) -> Result<Order, AppError> {
        if checkout.lines.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("Order has no items")));
        }

        let items = self.price_lines(&checkout.lines).await?;
        let items_price: Decimal = items.iter().map(LineItem::line_total).sum();

        // Held until the order is persisted so the usage count cannot go stale.
        let mut coupon_guard = None;
        let (coupon_code, discount_price) = match checkout.coupon_code.as_deref() {
            Some(code) if !code.trim().is_empty() => {
                coupon_guard = Some(self.coupons.lock(code).await);
                let accepted = self
                    .coupons
                    .evaluate(code, items_price, &principal.user_id)
                    .await?
                    .into_result()?;
                let discount = accepted.discount_for(items_price);
                (Some(accepted.code), discount)
            }
            _ => (None, Decimal::ZERO),
        };

        let prices = PriceBreakdown::new(
            items_price,
            discount_price,
            self.shipping.quote(items_price),
        );

        let mut reserved: Vec<(VariantKey, i64)> = Vec::with_capacity(items.len());
        for item in &items {
            match self.inventory.reserve(&item.variant_key(), item.quantity).await {
                Ok(reservation) => reserved.push(reservation.into_line()),
                Err(e) => {
                    self.inventory.release_all(reserved).await;
                    if let InventoryError::InsufficientStock { key, available, .. } = &e {
                        tracing::info!(variant = %key, available, "Checkout lost stock race");
                    }
                    return Err(e.into());
                }
            }
        }

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4().to_string(),
            user_id: principal.user_id.clone(),
            customer_email: principal.email.clone(),
            items,
            shipping_address: checkout.shipping_address,
            payment_method: checkout.payment_method,
            payment_result: None,
            payment_reference: None,
            items_price: prices.items_price,
            discount_price: prices.discount_price,
            shipping_price: prices.shipping_price,
            total_price: prices.total_price,
            coupon_code,
            is_paid: false,
            paid_at: None,
            is_delivered: false,
            delivered_at: None,
            status: OrderStatus::Pending,
            shipping_label: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.orders.insert_order(order.clone()).await {
            tracing::error!(error = %e, "Failed to persist order, releasing stock");
            self.inventory.release_all(reserved).await;
            return Err(e);
        }
        drop(coupon_guard);

        metrics::record_order_placed(&order.payment_method.to_string());
        tracing::info!(
            order_id = %order.id,
            user_id = %order.user_id,
            total = %order.total_price,
            payment_method = %order.payment_method,
            coupon = ?order.coupon_code,
            "Order placed"
        );
        self.notifier.notify(NewNotification::new_order(&order));

        Ok(order)
    }

    /// Snapshot catalog data for each line. Client prices are ignored.
    async fn price_lines(&self, lines: &[CheckoutLine]) -> Result<Vec<LineItem>, AppError> {
        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let key = VariantKey::new(&line.product_id, &line.size, &line.color);
            if line.quantity <= 0 {
                return Err(InventoryError::InvalidQuantity(line.quantity).into());
            }
            let product = self
                .products
                .get_product(&line.product_id)
                .await?
                .ok_or_else(|| InventoryError::VariantNotFound(key.clone()))?;
            if product.variant(&line.size, &line.color).is_none() {
                return Err(InventoryError::VariantNotFound(key).into());
            }

            if let Some(claimed) = line.claimed_unit_price {
                if claimed != product.price {
                    tracing::debug!(
                        product_id = %product.id,
                        claimed = %claimed,
                        actual = %product.price,
                        "Ignoring client-supplied price"
                    );
                }
            }

            items.push(LineItem {
                product_id: product.id.clone(),
                name: product.name.clone(),
                image: product.image.clone(),
                size: line.size.clone(),
                color: line.color.clone(),
                quantity: line.quantity,
                unit_price: product.price,
            });
        }
        Ok(items)
    }

    pub async fn get_order(&self, id: &str, principal: &Principal) -> Result<Order, AppError> {
        let order = self.load(id).await?;
        if !principal.can_access(&order.user_id) {
            return Err(AppError::NotFound(anyhow::anyhow!("Order {} not found", id)));
        }
        Ok(order)
    }

    pub async fn list_for_user(&self, principal: &Principal) -> Result<Vec<Order>, AppError> {
        self.orders.list_orders_for_user(&principal.user_id).await
    }

    pub async fn list_all(&self, limit: i64) -> Result<Vec<Order>, AppError> {
        self.orders.list_orders(limit).await
    }

    /// Administrative status change. Cancelling puts the order's stock back.
    pub async fn update_status(&self, id: &str, next: OrderStatus) -> Result<Order, AppError> {
        let order = self.load(id).await?;
        if !order.status.can_transition_to(next) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Cannot move order {} from {} to {}",
                id,
                order.status,
                next
            )));
        }

        let applied = self
            .orders
            .transition_status(id, order.status, next, Utc::now())
            .await?;
        if !applied {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Order {} changed concurrently, retry",
                id
            )));
        }

        if next == OrderStatus::Cancelled {
            let lines: Vec<(VariantKey, i64)> = order
                .items
                .iter()
                .map(|i| (i.variant_key(), i.quantity))
                .collect();
            self.inventory.release_all(lines).await;
        }

        tracing::info!(order_id = %id, from = %order.status, to = %next, "Order status changed");
        self.load(id).await
    }

    /// Issue a shipping label for a `Processing` order.
    pub async fn issue_label(&self, id: &str) -> Result<Order, AppError> {
        let order = self.load(id).await?;
        if order.status != OrderStatus::Processing {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Labels can only be issued for Processing orders (order {} is {})",
                id,
                order.status
            )));
        }
        if order.shipping_label.is_some() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Order {} already has a shipping label",
                id
            )));
        }

        let label = self.shipping.issue_label(&order).await?;
        self.orders.set_shipping_label(id, label).await?;
        self.load(id).await
    }

    async fn load(&self, id: &str) -> Result<Order, AppError> {
        self.orders
            .get_order(id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order {} not found", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_subtract_discount_and_add_shipping() {
        let prices = PriceBreakdown::new(
            Decimal::new(1500, 0),
            Decimal::new(150, 0),
            Decimal::new(100, 0),
        );
        assert_eq!(prices.total_price, Decimal::new(1450, 0));

        let no_coupon =
            PriceBreakdown::new(Decimal::new(1500, 0), Decimal::ZERO, Decimal::new(100, 0));
        assert_eq!(
            no_coupon.items_price + no_coupon.shipping_price,
            no_coupon.total_price
        );
    }
}

//! Post-delivery return requests.

use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    LineItem, NotificationCategory, OrderStatus, Principal, ReturnItem, ReturnRequest, ReturnStatus,
    VariantKey,
};
use crate::services::notifications::{NewNotification, Notifier};
use crate::services::repository::{OrderRepository, ReturnRepository};

#[derive(Debug, Clone)]
pub struct ReturnReview {
    pub status: ReturnStatus,
    pub refund_amount: Option<Decimal>,
    pub admin_note: Option<String>,
}

#[derive(Clone)]
pub struct ReturnService {
    orders: Arc<dyn OrderRepository>,
    returns: Arc<dyn ReturnRepository>,
    notifier: Notifier,
}

impl ReturnService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        returns: Arc<dyn ReturnRepository>,
        notifier: Notifier,
    ) -> Self {
        Self {
            orders,
            returns,
            notifier,
        }
    }

    /// Open a return for a delivered order owned by the caller. The refund
    /// amount stays at zero until an administrator reviews it.
    pub async fn create(
        &self,
        principal: &Principal,
        order_id: &str,
        items: Vec<ReturnItem>,
    ) -> Result<ReturnRequest, AppError> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .filter(|o| o.user_id == principal.user_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order {} not found", order_id)))?;

        if order.status != OrderStatus::Delivered {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Order {} is {}; only delivered orders can be returned",
                order.id,
                order.status
            )));
        }

        if self.returns.find_return_for_order(&order.id).await?.is_some() {
            return Err(already_requested(&order.id));
        }

        check_items(&order.items, &items)?;

        let now = Utc::now();
        let request = ReturnRequest {
            id: Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            user_id: principal.user_id.clone(),
            items,
            status: ReturnStatus::Pending,
            refund_amount: Decimal::ZERO,
            admin_note: None,
            created_at: now,
            updated_at: now,
        };

        // The store enforces one request per order even under a race.
        if !self.returns.insert_return(request.clone()).await? {
            return Err(already_requested(&order.id));
        }

        tracing::info!(return_id = %request.id, order_id = %order.id, "Return requested");
        self.notifier.notify(NewNotification::new(
            "Return requested",
            format!("A return was requested for order {}", order.id),
            NotificationCategory::Order,
            Some(format!("/admin/returns/{}", request.id)),
        ));

        Ok(request)
    }

    /// The caller's own requests, or every request for administrators.
    pub async fn list(&self, principal: &Principal) -> Result<Vec<ReturnRequest>, AppError> {
        if principal.is_admin {
            self.returns.list_returns(None).await
        } else {
            self.returns.list_returns(Some(&principal.user_id)).await
        }
    }

    pub async fn review(&self, id: &str, review: ReturnReview) -> Result<ReturnRequest, AppError> {
        let current = self.load(id).await?;

        if current.status.is_terminal() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Return {} is already {:?}",
                id,
                current.status
            )));
        }
        if !current.status.can_transition_to(review.status) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Cannot move return {} from {:?} to {:?}",
                id,
                current.status,
                review.status
            )));
        }

        let refund_amount = review.refund_amount.unwrap_or(current.refund_amount);
        if refund_amount < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Refund amount cannot be negative"
            )));
        }

        let applied = self
            .returns
            .update_return(
                id,
                current.status,
                review.status,
                refund_amount,
                review.admin_note,
                Utc::now(),
            )
            .await?;
        if !applied {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Return {} changed concurrently, retry",
                id
            )));
        }

        tracing::info!(
            return_id = %id,
            from = ?current.status,
            to = ?review.status,
            refund = %refund_amount,
            "Return reviewed"
        );
        self.load(id).await
    }

    async fn load(&self, id: &str) -> Result<ReturnRequest, AppError> {
        self.returns
            .get_return(id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Return {} not found", id)))
    }
}

fn already_requested(order_id: &str) -> AppError {
    AppError::Conflict(anyhow::anyhow!(
        "A return has already been requested for order {}",
        order_id
    ))
}

/// Returned lines must exist on the order and not exceed what was ordered.
fn check_items(ordered: &[LineItem], requested: &[ReturnItem]) -> Result<(), AppError> {
    if requested.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "A return needs at least one item"
        )));
    }

    let mut totals: HashMap<VariantKey, i64> = HashMap::new();
    for item in requested {
        if item.quantity <= 0 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Return quantity must be positive"
            )));
        }
        *totals
            .entry(VariantKey::new(&item.product_id, &item.size, &item.color))
            .or_default() += item.quantity;
    }

    for (key, quantity) in totals {
        let ordered_quantity = ordered
            .iter()
            .find(|line| line.variant_key() == key)
            .map(|line| line.quantity)
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("{} is not part of this order", key))
            })?;
        if quantity > ordered_quantity {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Cannot return {} of {}; only {} ordered",
                quantity,
                key,
                ordered_quantity
            )));
        }
    }
    Ok(())
}

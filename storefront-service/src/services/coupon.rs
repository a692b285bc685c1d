//! Coupon evaluation.
//!
//! Usage is never stored on the coupon; it is counted from the orders that
//! carry the code each time the coupon is evaluated. Checkout holds the
//! per-code lock from evaluation until its order is persisted so the count it
//! saw cannot be overtaken by a concurrent checkout.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{Coupon, DiscountType};
use crate::services::repository::{CouponRepository, OrderRepository};

/// Why a coupon was refused. Checked in declaration order; the first failure wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Error)]
pub enum CouponRejection {
    #[error("Coupon is invalid or expired")]
    InvalidOrExpired,
    #[error("Order amount is below the coupon minimum")]
    BelowMinimum,
    #[error("Coupon usage limit reached")]
    LimitReached,
    #[error("Coupon already used")]
    AlreadyUsed,
}

impl From<CouponRejection> for AppError {
    fn from(rejection: CouponRejection) -> Self {
        AppError::Conflict(rejection.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedCoupon {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
}

impl AcceptedCoupon {
    pub fn discount_for(&self, subtotal: Decimal) -> Decimal {
        self.discount_type.discount_for(self.discount_value, subtotal)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CouponDecision {
    Accepted(AcceptedCoupon),
    Rejected(CouponRejection),
}

impl CouponDecision {
    pub fn into_result(self) -> Result<AcceptedCoupon, CouponRejection> {
        match self {
            CouponDecision::Accepted(accepted) => Ok(accepted),
            CouponDecision::Rejected(reason) => Err(reason),
        }
    }
}

/// Checks that need only the coupon record and the order amount.
pub fn check_terms(
    coupon: Option<&Coupon>,
    order_amount: Decimal,
    now: DateTime<Utc>,
) -> Result<&Coupon, CouponRejection> {
    let coupon = match coupon {
        Some(c) if c.is_active && c.expires_at > now => c,
        _ => return Err(CouponRejection::InvalidOrExpired),
    };
    if order_amount < coupon.min_order_amount {
        return Err(CouponRejection::BelowMinimum);
    }
    Ok(coupon)
}

/// Checks against the counted usage of the coupon.
pub fn check_usage(
    coupon: &Coupon,
    global_uses: u64,
    user_uses: u64,
) -> Result<(), CouponRejection> {
    if let Some(max) = coupon.max_uses {
        if global_uses >= u64::from(max) {
            return Err(CouponRejection::LimitReached);
        }
    }
    if user_uses >= u64::from(coupon.uses_per_user) {
        return Err(CouponRejection::AlreadyUsed);
    }
    Ok(())
}

#[derive(Clone)]
pub struct CouponEvaluator {
    coupons: Arc<dyn CouponRepository>,
    orders: Arc<dyn OrderRepository>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl CouponEvaluator {
    pub fn new(coupons: Arc<dyn CouponRepository>, orders: Arc<dyn OrderRepository>) -> Self {
        Self {
            coupons,
            orders,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Read-only: evaluating a coupon never consumes it.
    pub async fn evaluate(
        &self,
        code: &str,
        order_amount: Decimal,
        user_id: &str,
    ) -> Result<CouponDecision, AppError> {
        let code = Coupon::normalize_code(code);
        let coupon = self.coupons.find_coupon(&code).await?;

        let coupon = match check_terms(coupon.as_ref(), order_amount, Utc::now()) {
            Ok(c) => c,
            Err(reason) => return Ok(CouponDecision::Rejected(reason)),
        };

        let global_uses = match coupon.max_uses {
            Some(_) => self.orders.count_coupon_uses(&code, None).await?,
            None => 0,
        };
        let user_uses = self.orders.count_coupon_uses(&code, Some(user_id)).await?;

        if let Err(reason) = check_usage(coupon, global_uses, user_uses) {
            tracing::debug!(
                code = %code,
                user_id = %user_id,
                global_uses,
                user_uses,
                reason = ?reason,
                "Coupon rejected on usage"
            );
            return Ok(CouponDecision::Rejected(reason));
        }

        Ok(CouponDecision::Accepted(AcceptedCoupon {
            code: coupon.code.clone(),
            discount_type: coupon.discount_type,
            discount_value: coupon.discount_value,
        }))
    }

    /// Serialise consumers of one code within this process. The table entry
    /// lives only while a guard for the code is held or awaited.
    pub async fn lock(&self, code: &str) -> CouponGuard {
        let code = Coupon::normalize_code(code);
        let mutex = self.locks.entry(code.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;
        CouponGuard {
            code,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }
}

/// Exclusive hold on one coupon code.
pub struct CouponGuard {
    code: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CouponGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters hold a clone of the mutex, so a count of one means nobody else wants it.
        self.locks
            .remove_if(&self.code, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn save10() -> Coupon {
        Coupon {
            id: "c1".to_string(),
            code: "SAVE10".to_string(),
            discount_type: DiscountType::Percentage,
            discount_value: Decimal::new(10, 0),
            min_order_amount: Decimal::new(1000, 0),
            max_uses: None,
            uses_per_user: 1,
            expires_at: Utc::now() + Duration::days(30),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn missing_inactive_and_expired_coupons_are_invalid() {
        let now = Utc::now();
        assert_eq!(
            check_terms(None, Decimal::new(1500, 0), now).unwrap_err(),
            CouponRejection::InvalidOrExpired
        );

        let mut inactive = save10();
        inactive.is_active = false;
        assert_eq!(
            check_terms(Some(&inactive), Decimal::new(1500, 0), now).unwrap_err(),
            CouponRejection::InvalidOrExpired
        );

        let mut expired = save10();
        expired.expires_at = now - Duration::seconds(1);
        assert_eq!(
            check_terms(Some(&expired), Decimal::new(1500, 0), now).unwrap_err(),
            CouponRejection::InvalidOrExpired
        );
    }

    #[test]
    fn minimum_amount_is_inclusive() {
        let coupon = save10();
        let now = Utc::now();
        assert!(check_terms(Some(&coupon), Decimal::new(1000, 0), now).is_ok());
        assert_eq!(
            check_terms(Some(&coupon), Decimal::new(999, 0), now).unwrap_err(),
            CouponRejection::BelowMinimum
        );
    }

    #[test]
    fn global_limit_is_checked_before_per_user_limit() {
        let mut coupon = save10();
        coupon.max_uses = Some(1);
        assert_eq!(
            check_usage(&coupon, 1, 1).unwrap_err(),
            CouponRejection::LimitReached
        );
        assert_eq!(
            check_usage(&coupon, 0, 1).unwrap_err(),
            CouponRejection::AlreadyUsed
        );
        assert!(check_usage(&coupon, 0, 0).is_ok());
    }

    #[test]
    fn expired_wins_over_below_minimum() {
        let mut coupon = save10();
        coupon.expires_at = Utc::now() - Duration::days(1);
        assert_eq!(
            check_terms(Some(&coupon), Decimal::new(10, 0), Utc::now()).unwrap_err(),
            CouponRejection::InvalidOrExpired
        );
    }

    #[test]
    fn accepted_coupon_computes_discount() {
        let accepted = AcceptedCoupon {
            code: "SAVE10".to_string(),
            discount_type: DiscountType::Percentage,
            discount_value: Decimal::new(10, 0),
        };
        assert_eq!(accepted.discount_for(Decimal::new(1500, 0)), Decimal::new(150, 0));
    }

    fn evaluator() -> CouponEvaluator {
        let store = Arc::new(crate::services::repository::MemoryStore::new());
        CouponEvaluator::new(store.clone(), store)
    }

    #[tokio::test]
    async fn released_locks_leave_no_entries() {
        let coupons = evaluator();
        for i in 0..1000 {
            let guard = coupons.lock(&format!("junk-{}", i)).await;
            drop(guard);
        }
        assert_eq!(coupons.locks.len(), 0);
    }

    #[tokio::test]
    async fn lock_entry_survives_while_contended() {
        let coupons = evaluator();
        let first = coupons.lock("save10").await;

        let waiter = {
            let coupons = coupons.clone();
            tokio::spawn(async move {
                let _second = coupons.lock("SAVE10").await;
            })
        };
        tokio::task::yield_now().await;

        drop(first);
        waiter.await.unwrap();
        assert_eq!(coupons.locks.len(), 0);
    }
}

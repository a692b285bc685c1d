//! Payment reconciliation.
//!
//! Both gateways end in a verified [`PaymentConfirmation`], and every
//! confirmation goes through [`PaymentReconciler::apply`]. The store's
//! conditional "mark paid if unpaid" update decides which delivery wins, so
//! repeated or concurrent confirmations for the same order stamp `paid_at`
//! and notify exactly once.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{Order, OrderStatus, PaymentMethod, PaymentResult, Principal};
use crate::services::gateways::{
    esewa::EsewaFormFields,
    khalti::{KhaltiCustomerInfo, KhaltiInitiateRequest, KhaltiInitiateResponse},
    EsewaClient, KhaltiClient, PaymentError,
};
use crate::services::metrics;
use crate::services::notifications::{NewNotification, Notifier};
use crate::services::repository::OrderRepository;

const ESEWA_COMPLETE: &str = "COMPLETE";

/// A gateway's verified statement that an order has been paid.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentConfirmation {
    /// Signed-redirect gateway (eSewa).
    RedirectPayload {
        order_id: String,
        transaction_code: String,
        status: String,
        total_amount: Decimal,
    },
    /// Lookup-verified gateway (Khalti).
    LookupVerified {
        order_id: String,
        pidx: String,
        transaction_id: Option<String>,
        status: String,
        total_amount_paisa: i64,
    },
}

impl PaymentConfirmation {
    pub fn order_id(&self) -> &str {
        match self {
            PaymentConfirmation::RedirectPayload { order_id, .. }
            | PaymentConfirmation::LookupVerified { order_id, .. } => order_id,
        }
    }

    pub fn gateway(&self) -> &'static str {
        match self {
            PaymentConfirmation::RedirectPayload { .. } => "esewa",
            PaymentConfirmation::LookupVerified { .. } => "khalti",
        }
    }

    fn payment_result(&self, at: DateTime<Utc>, payer_email: Option<String>) -> PaymentResult {
        match self {
            PaymentConfirmation::RedirectPayload {
                transaction_code,
                status,
                ..
            } => PaymentResult {
                transaction_id: transaction_code.clone(),
                status: status.clone(),
                updated_at: at,
                email_address: payer_email,
            },
            PaymentConfirmation::LookupVerified {
                pidx,
                transaction_id,
                status,
                ..
            } => PaymentResult {
                transaction_id: transaction_id.clone().unwrap_or_else(|| pidx.clone()),
                status: status.clone(),
                updated_at: at,
                email_address: payer_email,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// This call moved the order to paid.
    Confirmed(Order),
    /// The order was already paid; nothing changed.
    AlreadyPaid(Order),
}

impl ReconcileOutcome {
    pub fn order(&self) -> &Order {
        match self {
            ReconcileOutcome::Confirmed(order) | ReconcileOutcome::AlreadyPaid(order) => order,
        }
    }

    pub fn already_paid(&self) -> bool {
        matches!(self, ReconcileOutcome::AlreadyPaid(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfirmError {
    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    App(#[from] AppError),
}

impl ConfirmError {
    pub fn reason(&self) -> &'static str {
        match self {
            ConfirmError::Payment(e) => e.reason(),
            ConfirmError::App(AppError::NotFound(_)) => "order_not_found",
            ConfirmError::App(AppError::Conflict(_)) => "order_not_payable",
            ConfirmError::App(_) => "internal_error",
        }
    }
}

impl From<ConfirmError> for AppError {
    fn from(err: ConfirmError) -> Self {
        match err {
            ConfirmError::Payment(e) => e.into(),
            ConfirmError::App(e) => e,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EsewaInitiation {
    pub form_url: String,
    pub fields: EsewaFormFields,
}

#[derive(Clone)]
pub struct PaymentReconciler {
    orders: Arc<dyn OrderRepository>,
    notifier: Notifier,
    esewa: EsewaClient,
    khalti: KhaltiClient,
    public_url: String,
    frontend_url: String,
}

impl PaymentReconciler {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        notifier: Notifier,
        esewa: EsewaClient,
        khalti: KhaltiClient,
        public_url: String,
        frontend_url: String,
    ) -> Self {
        Self {
            orders,
            notifier,
            esewa,
            khalti,
            public_url: public_url.trim_end_matches('/').to_string(),
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
        }
    }

    /// The single paid transition shared by both gateways.
    pub async fn apply(
        &self,
        confirmation: PaymentConfirmation,
    ) -> Result<ReconcileOutcome, AppError> {
        let now = Utc::now();
        let order_id = confirmation.order_id();
        let payer_email = self.load(order_id).await?.customer_email;

        let applied = self
            .orders
            .mark_paid(order_id, confirmation.payment_result(now, payer_email), now)
            .await?;
        let order = self.load(order_id).await?;

        if applied {
            metrics::record_payment_confirmed(confirmation.gateway());
            tracing::info!(
                order_id = %order.id,
                gateway = confirmation.gateway(),
                total = %order.total_price,
                "Order marked paid"
            );
            self.notifier
                .notify(NewNotification::payment_confirmed(&order));
            Ok(ReconcileOutcome::Confirmed(order))
        } else if order.is_paid {
            tracing::info!(order_id = %order.id, "Duplicate payment confirmation ignored");
            Ok(ReconcileOutcome::AlreadyPaid(order))
        } else {
            Err(AppError::Conflict(anyhow::anyhow!(
                "Order {} is {} and cannot be paid",
                order.id,
                order.status
            )))
        }
    }

    /// Path A: decode the redirect payload and verify it before applying.
    pub async fn confirm_esewa(&self, encoded: &str) -> Result<ReconcileOutcome, ConfirmError> {
        let result = self.confirm_esewa_inner(encoded).await;
        if let Err(e) = &result {
            metrics::record_verification_failure("esewa");
            tracing::warn!(error = %e, reason = e.reason(), "eSewa confirmation rejected");
        }
        result
    }

    async fn confirm_esewa_inner(&self, encoded: &str) -> Result<ReconcileOutcome, ConfirmError> {
        let callback = self.esewa.decode_callback(encoded)?;
        let order = self.load(&callback.transaction_uuid).await?;

        if order.is_paid {
            return Ok(ReconcileOutcome::AlreadyPaid(order));
        }
        if order.payment_method != PaymentMethod::Esewa {
            return Err(PaymentError::ReferenceMismatch.into());
        }
        if callback.status != ESEWA_COMPLETE {
            return Err(PaymentError::NotCompleted(callback.status).into());
        }
        if callback.total_amount != order.total_price {
            return Err(PaymentError::AmountMismatch {
                reported: callback.total_amount.to_string(),
                expected: order.total_price.to_string(),
            }
            .into());
        }
        if self.esewa.verify_with_lookup() {
            let status = self
                .esewa
                .check_status(&callback.transaction_uuid, &callback.total_amount_raw)
                .await?;
            if status.status != ESEWA_COMPLETE {
                return Err(PaymentError::NotCompleted(status.status).into());
            }
            tracing::debug!(
                order_id = %order.id,
                ref_id = ?status.ref_id,
                "eSewa status confirmed"
            );
        } else if !callback.signed {
            // Without a lookup the signature is the only proof of origin.
            return Err(PaymentError::InvalidSignature.into());
        }

        let confirmation = PaymentConfirmation::RedirectPayload {
            order_id: order.id,
            transaction_code: callback.transaction_code,
            status: callback.status,
            total_amount: callback.total_amount,
        };
        Ok(self.apply(confirmation).await?)
    }

    /// Path B: only a `Completed` lookup for the order's own `pidx` counts.
    pub async fn confirm_khalti(
        &self,
        pidx: &str,
        order_id: &str,
    ) -> Result<ReconcileOutcome, ConfirmError> {
        let result = self.confirm_khalti_inner(pidx, order_id).await;
        if let Err(e) = &result {
            metrics::record_verification_failure("khalti");
            tracing::warn!(
                error = %e,
                reason = e.reason(),
                order_id = %order_id,
                pidx = %pidx,
                "Khalti confirmation rejected"
            );
        }
        result
    }

    async fn confirm_khalti_inner(
        &self,
        pidx: &str,
        order_id: &str,
    ) -> Result<ReconcileOutcome, ConfirmError> {
        let order = self.load(order_id).await?;

        if order.is_paid {
            return Ok(ReconcileOutcome::AlreadyPaid(order));
        }
        if order.payment_method != PaymentMethod::Khalti
            || order.payment_reference.as_deref() != Some(pidx)
        {
            return Err(PaymentError::ReferenceMismatch.into());
        }

        let lookup = self.khalti.lookup(pidx).await?;
        if !lookup.is_completed() {
            return Err(PaymentError::NotCompleted(lookup.status).into());
        }
        let expected = order.total_in_paisa();
        if lookup.total_amount != expected {
            return Err(PaymentError::AmountMismatch {
                reported: lookup.total_amount.to_string(),
                expected: expected.to_string(),
            }
            .into());
        }

        let confirmation = PaymentConfirmation::LookupVerified {
            order_id: order.id,
            pidx: lookup.pidx,
            transaction_id: lookup.transaction_id,
            status: lookup.status,
            total_amount_paisa: lookup.total_amount,
        };
        Ok(self.apply(confirmation).await?)
    }

    pub async fn initiate_esewa(
        &self,
        order_id: &str,
        principal: &Principal,
    ) -> Result<EsewaInitiation, AppError> {
        let order = self
            .payable_order(order_id, principal, PaymentMethod::Esewa)
            .await?;
        let fields = self.esewa.form_fields(
            &order,
            format!("{}/payments/esewa/callback", self.public_url),
            self.failure_redirect(Some(&order.id), "cancelled"),
        )?;

        tracing::info!(order_id = %order.id, total = %order.total_price, "eSewa payment initiated");
        Ok(EsewaInitiation {
            form_url: self.esewa.form_url().to_string(),
            fields,
        })
    }

    pub async fn initiate_khalti(
        &self,
        order_id: &str,
        principal: &Principal,
    ) -> Result<KhaltiInitiateResponse, AppError> {
        let order = self
            .payable_order(order_id, principal, PaymentMethod::Khalti)
            .await?;

        let request = KhaltiInitiateRequest {
            return_url: format!("{}/payments/khalti/callback", self.public_url),
            website_url: self.khalti.website_url().to_string(),
            amount: order.total_in_paisa(),
            purchase_order_id: order.id.clone(),
            purchase_order_name: format!("Order {}", order.id),
            customer_info: KhaltiCustomerInfo {
                name: order.shipping_address.full_name.clone(),
                email: order.customer_email.clone(),
                phone: order.shipping_address.phone.clone(),
            },
        };
        let initiated = self.khalti.initiate(&request).await?;

        if !self
            .orders
            .set_payment_reference(&order.id, &initiated.pidx)
            .await?
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Order {} was paid while initiating",
                order.id
            )));
        }
        Ok(initiated)
    }

    pub fn success_redirect(&self, order_id: &str) -> String {
        format!("{}/orders/{}?payment=success", self.frontend_url, order_id)
    }

    pub fn failure_redirect(&self, order_id: Option<&str>, reason: &str) -> String {
        match order_id {
            Some(id) => format!(
                "{}/orders/{}?payment=failed&reason={}",
                self.frontend_url,
                id,
                urlencoding::encode(reason)
            ),
            None => format!(
                "{}/checkout?payment=failed&reason={}",
                self.frontend_url,
                urlencoding::encode(reason)
            ),
        }
    }

    async fn payable_order(
        &self,
        order_id: &str,
        principal: &Principal,
        method: PaymentMethod,
    ) -> Result<Order, AppError> {
        let order = self.load(order_id).await?;
        if !principal.can_access(&order.user_id) {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Order {} not found",
                order_id
            )));
        }
        if order.payment_method != method {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Order {} is payable by {}, not {}",
                order.id,
                order.payment_method,
                method
            )));
        }
        if order.is_paid || order.status != OrderStatus::Pending {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Order {} is not awaiting payment",
                order.id
            )));
        }
        Ok(order)
    }

    async fn load(&self, order_id: &str) -> Result<Order, AppError> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order {} not found", order_id)))
    }
}

//! Payment gateway adapters.
//!
//! Each adapter turns a gateway's own completion protocol into a verified
//! [`PaymentConfirmation`](crate::services::payments::PaymentConfirmation).

pub mod esewa;
pub mod khalti;

use service_core::error::AppError;
use thiserror::Error;

pub use esewa::{EsewaCallback, EsewaClient, EsewaFormFields};
pub use khalti::{KhaltiClient, KhaltiInitiateRequest, KhaltiInitiateResponse, KhaltiLookup};

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Malformed gateway payload: {0}")]
    MalformedPayload(String),

    #[error("Gateway signature does not match")]
    InvalidSignature,

    #[error("Payment not completed (gateway status: {0})")]
    NotCompleted(String),

    #[error("Paid amount {reported} does not match order total {expected}")]
    AmountMismatch { reported: String, expected: String },

    #[error("Payment reference does not belong to this order")]
    ReferenceMismatch,

    #[error("Gateway verification failed: {0}")]
    VerificationFailed(String),

    #[error("Gateway request failed: {0}")]
    Upstream(String),
}

impl PaymentError {
    /// Short machine-readable reason, used in failure redirects and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            PaymentError::MalformedPayload(_) => "malformed_payload",
            PaymentError::InvalidSignature => "invalid_signature",
            PaymentError::NotCompleted(_) => "not_completed",
            PaymentError::AmountMismatch { .. } => "amount_mismatch",
            PaymentError::ReferenceMismatch => "reference_mismatch",
            PaymentError::VerificationFailed(_) => "verification_failed",
            PaymentError::Upstream(_) => "upstream_error",
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::VerificationFailed(_) | PaymentError::Upstream(_) => {
                AppError::BadGateway(err.to_string())
            }
            _ => AppError::BadRequest(err.into()),
        }
    }
}

/// Map transport failures (timeouts included) onto an explicit verification failure.
pub(crate) fn verification_error(err: reqwest::Error) -> PaymentError {
    if err.is_timeout() {
        PaymentError::VerificationFailed("gateway lookup timed out".to_string())
    } else {
        PaymentError::VerificationFailed(err.to_string())
    }
}

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::OrderStatus;

#[derive(Debug, Deserialize, Validate)]
pub struct InitiatePaymentRequest {
    #[validate(length(min = 1, message = "Order id is required"))]
    pub order_id: String,
}

/// Query string eSewa appends to the success URL.
#[derive(Debug, Deserialize)]
pub struct EsewaCallbackQuery {
    pub data: Option<String>,
}

/// Query string Khalti appends to the return URL. Only `pidx` and
/// `purchase_order_id` are used; the rest is informational.
#[derive(Debug, Deserialize)]
pub struct KhaltiCallbackQuery {
    pub pidx: Option<String>,
    pub purchase_order_id: Option<String>,
    pub status: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct KhaltiVerifyRequest {
    #[validate(length(min = 1, message = "pidx is required"))]
    pub pidx: String,
    #[validate(length(min = 1, message = "Order id is required"))]
    pub purchase_order_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentVerificationResponse {
    pub success: bool,
    pub order_id: String,
    pub already_paid: bool,
    pub status: OrderStatus,
    pub message: String,
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::non_negative;

use crate::models::{ReturnItem, ReturnRequest, ReturnStatus};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ReturnItemRequest {
    #[validate(length(min = 1, message = "Product id is required"))]
    pub product_id: String,
    #[validate(length(min = 1, message = "Size is required"))]
    pub size: String,
    #[validate(length(min = 1, message = "Color is required"))]
    pub color: String,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i64,
    #[validate(length(min = 1, max = 500, message = "Reason is required"))]
    pub reason: String,
    #[validate(length(min = 1, max = 100, message = "Condition is required"))]
    pub condition: String,
}

impl From<ReturnItemRequest> for ReturnItem {
    fn from(item: ReturnItemRequest) -> Self {
        Self {
            product_id: item.product_id,
            size: item.size,
            color: item.color,
            quantity: item.quantity,
            reason: item.reason,
            condition: item.condition,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateReturnRequest {
    #[validate(length(min = 1, message = "Order id is required"))]
    pub order_id: String,
    #[validate(length(min = 1, message = "At least one item is required"), nested)]
    pub items: Vec<ReturnItemRequest>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewReturnRequest {
    pub status: ReturnStatus,
    #[validate(custom(function = "non_negative"))]
    pub refund_amount: Option<Decimal>,
    #[validate(length(max = 1000, message = "Note is too long"))]
    pub admin_note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReturnResponse {
    pub id: String,
    pub order_id: String,
    pub user_id: String,
    pub items: Vec<ReturnItem>,
    pub status: ReturnStatus,
    pub refund_amount: Decimal,
    pub admin_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ReturnRequest> for ReturnResponse {
    fn from(request: ReturnRequest) -> Self {
        Self {
            id: request.id,
            order_id: request.order_id,
            user_id: request.user_id,
            items: request.items,
            status: request.status,
            refund_amount: request.refund_amount,
            admin_note: request.admin_note,
            created_at: request.created_at,
            updated_at: request.updated_at,
        }
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ReturnStatus {
    Pending,
    Approved,
    Rejected,
    Refunded,
}

impl ReturnStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReturnStatus::Rejected | ReturnStatus::Refunded)
    }

    pub fn can_transition_to(&self, next: ReturnStatus) -> bool {
        matches!(
            (self, next),
            (ReturnStatus::Pending, ReturnStatus::Approved)
                | (ReturnStatus::Pending, ReturnStatus::Rejected)
                | (ReturnStatus::Pending, ReturnStatus::Refunded)
                | (ReturnStatus::Approved, ReturnStatus::Refunded)
                | (ReturnStatus::Approved, ReturnStatus::Rejected)
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ReturnItem {
    pub product_id: String,
    pub size: String,
    pub color: String,
    pub quantity: i64,
    pub reason: String,
    pub condition: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReturnRequest {
    #[serde(rename = "_id")]
    pub id: String,
    pub order_id: String,
    pub user_id: String,
    pub items: Vec<ReturnItem>,
    pub status: ReturnStatus,
    /// Zero until an administrator reviews the request.
    pub refund_amount: Decimal,
    pub admin_note: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_cannot_move() {
        for next in [
            ReturnStatus::Pending,
            ReturnStatus::Approved,
            ReturnStatus::Rejected,
            ReturnStatus::Refunded,
        ] {
            assert!(!ReturnStatus::Rejected.can_transition_to(next));
            assert!(!ReturnStatus::Refunded.can_transition_to(next));
        }
    }

    #[test]
    fn approved_can_be_refunded() {
        assert!(ReturnStatus::Approved.can_transition_to(ReturnStatus::Refunded));
        assert!(!ReturnStatus::Approved.can_transition_to(ReturnStatus::Pending));
    }
}

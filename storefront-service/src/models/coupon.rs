use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Coupon {
    #[serde(rename = "_id")]
    pub id: String,
    /// Stored upper-case; lookups normalise the incoming code.
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_order_amount: Decimal,
    pub max_uses: Option<u32>,
    pub uses_per_user: u32,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Coupon {
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }
}

impl DiscountType {
    /// Discount granted on `subtotal`, never more than the subtotal itself.
    pub fn discount_for(&self, value: Decimal, subtotal: Decimal) -> Decimal {
        let raw = match self {
            DiscountType::Percentage => (subtotal * value / Decimal::ONE_HUNDRED).round_dp(2),
            DiscountType::Fixed => value,
        };
        raw.max(Decimal::ZERO).min(subtotal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_discount_is_rounded_to_cents() {
        let discount =
            DiscountType::Percentage.discount_for(Decimal::new(10, 0), Decimal::new(1555, 0));
        assert_eq!(discount, Decimal::new(15550, 2));
    }

    #[test]
    fn fixed_discount_never_exceeds_subtotal() {
        let discount = DiscountType::Fixed.discount_for(Decimal::new(500, 0), Decimal::new(300, 0));
        assert_eq!(discount, Decimal::new(300, 0));
    }

    #[test]
    fn code_is_case_insensitive() {
        assert_eq!(Coupon::normalize_code(" save10 "), "SAVE10");
    }
}

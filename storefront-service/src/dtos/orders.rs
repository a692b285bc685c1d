use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::non_negative;

use crate::models::{
    DiscountType, LineItem, Order, OrderStatus, PaymentMethod, PaymentResult, ShippingAddress,
    ShippingLabel,
};
use crate::services::coupon::{CouponDecision, CouponRejection};
use crate::services::orders::{Checkout, CheckoutLine};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CheckoutItemRequest {
    #[validate(length(min = 1, message = "Product id is required"))]
    pub product_id: String,
    #[validate(length(min = 1, message = "Size is required"))]
    pub size: String,
    #[validate(length(min = 1, message = "Color is required"))]
    pub color: String,
    #[validate(range(min = 1, max = 100, message = "Quantity must be between 1 and 100"))]
    pub quantity: i64,
    /// Client-side price. Accepted for compatibility, never used.
    #[serde(default)]
    pub price: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ShippingAddressRequest {
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,
    #[validate(length(min = 7, max = 20, message = "Phone number is invalid"))]
    pub phone: String,
    #[validate(length(min = 1, message = "Address is required"))]
    pub address: String,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    #[serde(default)]
    pub postal_code: String,
    #[validate(length(min = 1, message = "Country is required"))]
    pub country: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, message = "Order must contain at least one item"), nested)]
    pub items: Vec<CheckoutItemRequest>,
    #[validate(nested)]
    pub shipping_address: ShippingAddressRequest,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

impl From<CheckoutRequest> for Checkout {
    fn from(req: CheckoutRequest) -> Self {
        let address = req.shipping_address;
        Self {
            lines: req
                .items
                .into_iter()
                .map(|item| CheckoutLine {
                    product_id: item.product_id,
                    size: item.size,
                    color: item.color,
                    quantity: item.quantity,
                    claimed_unit_price: item.price,
                })
                .collect(),
            shipping_address: ShippingAddress {
                full_name: address.full_name,
                phone: address.phone,
                address: address.address,
                city: address.city,
                postal_code: address.postal_code,
                country: address.country,
            },
            payment_method: req.payment_method,
            coupon_code: req.coupon_code,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub items: Vec<LineItem>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub payment_result: Option<PaymentResult>,
    pub items_price: Decimal,
    pub discount_price: Decimal,
    pub shipping_price: Decimal,
    pub total_price: Decimal,
    pub coupon_code: Option<String>,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub status: OrderStatus,
    pub shipping_label: Option<ShippingLabel>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            items: order.items,
            shipping_address: order.shipping_address,
            payment_method: order.payment_method,
            payment_result: order.payment_result,
            items_price: order.items_price,
            discount_price: order.discount_price,
            shipping_price: order.shipping_price,
            total_price: order.total_price,
            coupon_code: order.coupon_code,
            is_paid: order.is_paid,
            paid_at: order.paid_at,
            is_delivered: order.is_delivered,
            delivered_at: order.delivered_at,
            status: order.status,
            shipping_label: order.shipping_label,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, message = "Coupon code is required"))]
    pub code: String,
    #[validate(custom(function = "non_negative"))]
    pub order_amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct ValidateCouponResponse {
    pub valid: bool,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_type: Option<DiscountType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_value: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<CouponRejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidateCouponResponse {
    pub fn from_decision(code: &str, order_amount: Decimal, decision: CouponDecision) -> Self {
        match decision {
            CouponDecision::Accepted(accepted) => Self {
                valid: true,
                discount_amount: Some(accepted.discount_for(order_amount)),
                discount_type: Some(accepted.discount_type),
                discount_value: Some(accepted.discount_value),
                code: accepted.code,
                reason: None,
                message: None,
            },
            CouponDecision::Rejected(reason) => Self {
                valid: false,
                code: code.trim().to_uppercase(),
                discount_type: None,
                discount_value: None,
                discount_amount: None,
                reason: Some(reason),
                message: Some(reason.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(items: serde_json::Value) -> CheckoutRequest {
        serde_json::from_value(json!({
            "items": items,
            "shipping_address": {
                "full_name": "Asha Rai",
                "phone": "9800000000",
                "address": "Lakeside",
                "city": "Pokhara",
                "country": "Nepal"
            },
            "payment_method": "COD"
        }))
        .unwrap()
    }

    #[test]
    fn checkout_items_are_validated_individually() {
        let ok = request(json!([
            { "product_id": "p1", "size": "M", "color": "Blue", "quantity": 2 }
        ]));
        assert!(ok.validate().is_ok());

        assert!(request(json!([])).validate().is_err());

        let bad_line = request(json!([
            { "product_id": "p1", "size": "M", "color": "Blue", "quantity": 0 }
        ]));
        assert!(bad_line.validate().is_err());
    }
}

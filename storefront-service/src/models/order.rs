use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::VariantKey;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Transitions an administrator may apply.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Processing)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Processing, OrderStatus::Shipped)
                | (OrderStatus::Processing, OrderStatus::Cancelled)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "Pending"),
            OrderStatus::Processing => write!(f, "Processing"),
            OrderStatus::Shipped => write!(f, "Shipped"),
            OrderStatus::Delivered => write!(f, "Delivered"),
            OrderStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    #[serde(rename = "COD")]
    CashOnDelivery,
    #[serde(rename = "eSewa")]
    Esewa,
    Khalti,
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentMethod::CashOnDelivery => write!(f, "COD"),
            PaymentMethod::Esewa => write!(f, "eSewa"),
            PaymentMethod::Khalti => write!(f, "Khalti"),
        }
    }
}

/// One ordered variant. Name, image and price are copied from the catalog at
/// order time and never change afterwards.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LineItem {
    pub product_id: String,
    pub name: String,
    pub image: String,
    pub size: String,
    pub color: String,
    pub quantity: i64,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn variant_key(&self) -> VariantKey {
        VariantKey::new(&self.product_id, &self.size, &self.color)
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ShippingAddress {
    pub full_name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PaymentResult {
    /// Gateway transaction id/code.
    pub transaction_id: String,
    /// Status string as reported by the gateway.
    pub status: String,
    pub updated_at: DateTime<Utc>,
    pub email_address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ShippingLabel {
    pub tracking_number: String,
    pub carrier: String,
    pub label_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub customer_email: Option<String>,
    pub items: Vec<LineItem>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub payment_result: Option<PaymentResult>,
    /// Gateway handle issued when payment was initiated (Khalti `pidx`).
    #[serde(default)]
    pub payment_reference: Option<String>,
    pub items_price: Decimal,
    pub discount_price: Decimal,
    pub shipping_price: Decimal,
    pub total_price: Decimal,
    pub coupon_code: Option<String>,
    pub is_paid: bool,
    #[serde(default, with = "super::optional_bson_datetime")]
    pub paid_at: Option<DateTime<Utc>>,
    pub is_delivered: bool,
    #[serde(default, with = "super::optional_bson_datetime")]
    pub delivered_at: Option<DateTime<Utc>>,
    pub status: OrderStatus,
    pub shipping_label: Option<ShippingLabel>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Total in the smallest currency unit (paisa), as Khalti reports amounts.
    pub fn total_in_paisa(&self) -> i64 {
        (self.total_price * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .unwrap_or(i64::MAX)
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{non_negative, positive};
use crate::models::{
    Coupon, DiscountType, Notification, NotificationCategory, OrderStatus, Product, Variant,
};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct VariantRequest {
    #[validate(length(min = 1, message = "Size is required"))]
    pub size: String,
    #[validate(length(min = 1, message = "Color is required"))]
    pub color: String,
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 200, message = "Name is required"))]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[validate(custom(function = "positive"))]
    pub price: Decimal,
    #[validate(length(min = 1, message = "At least one variant is required"), nested)]
    pub variants: Vec<VariantRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub image: String,
    pub price: Decimal,
    pub variants: Vec<Variant>,
    pub created_at: DateTime<Utc>,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            name: product.name,
            image: product.image,
            price: product.price,
            variants: product.variants,
            created_at: product.created_at,
        }
    }
}

fn default_uses_per_user() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCouponRequest {
    #[validate(length(min = 3, max = 32, message = "Code must be 3 to 32 characters"))]
    pub code: String,
    pub discount_type: DiscountType,
    #[validate(custom(function = "positive"))]
    pub discount_value: Decimal,
    #[serde(default)]
    #[validate(custom(function = "non_negative"))]
    pub min_order_amount: Decimal,
    #[validate(range(min = 1, message = "Max uses must be at least 1"))]
    pub max_uses: Option<u32>,
    #[serde(default = "default_uses_per_user")]
    #[validate(range(min = 1, message = "Uses per user must be at least 1"))]
    pub uses_per_user: u32,
    pub expires_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CouponResponse {
    pub id: String,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_order_amount: Decimal,
    pub max_uses: Option<u32>,
    pub uses_per_user: u32,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl From<Coupon> for CouponResponse {
    fn from(coupon: Coupon) -> Self {
        Self {
            id: coupon.id,
            code: coupon.code,
            discount_type: coupon.discount_type,
            discount_value: coupon.discount_value,
            min_order_amount: coupon.min_order_amount,
            max_uses: coupon.max_uses,
            uses_per_user: coupon.uses_per_user,
            expires_at: coupon.expires_at,
            is_active: coupon.is_active,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub id: String,
    pub title: String,
    pub message: String,
    pub category: NotificationCategory,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id,
            title: n.title,
            message: n.message,
            category: n.category,
            link: n.link,
            is_read: n.is_read,
            created_at: n.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<NotificationResponse>,
    pub unread_count: u64,
}

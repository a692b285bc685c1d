use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Product {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub image: String,
    pub price: Decimal,
    pub variants: Vec<Variant>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

/// A size/color combination of a product; stock is tracked here.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Variant {
    pub size: String,
    pub color: String,
    pub stock: i64,
}

/// Selector for one variant of one product.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct VariantKey {
    pub product_id: String,
    pub size: String,
    pub color: String,
}

impl VariantKey {
    pub fn new(
        product_id: impl Into<String>,
        size: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            size: size.into(),
            color: color.into(),
        }
    }
}

impl std::fmt::Display for VariantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.product_id, self.size, self.color)
    }
}

impl Product {
    pub fn variant(&self, size: &str, color: &str) -> Option<&Variant> {
        self.variants
            .iter()
            .find(|v| v.size == size && v.color == color)
    }

    pub fn variant_mut(&mut self, size: &str, color: &str) -> Option<&mut Variant> {
        self.variants
            .iter_mut()
            .find(|v| v.size == size && v.color == color)
    }
}

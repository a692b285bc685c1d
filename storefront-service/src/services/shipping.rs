//! Shipping quote and label capability.

use async_trait::async_trait;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

use crate::config::ShippingConfig;
use crate::models::{Order, ShippingLabel};

#[async_trait]
pub trait ShippingProvider: Send + Sync {
    /// Shipping charge for an order whose items cost `items_price`.
    fn quote(&self, items_price: Decimal) -> Decimal;

    async fn issue_label(&self, order: &Order) -> Result<ShippingLabel, AppError>;
}

/// Free shipping above a threshold, a flat rate otherwise.
pub struct FlatRateShipping {
    config: ShippingConfig,
}

impl FlatRateShipping {
    pub fn new(config: ShippingConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ShippingProvider for FlatRateShipping {
    fn quote(&self, items_price: Decimal) -> Decimal {
        if items_price >= self.config.free_shipping_threshold {
            Decimal::ZERO
        } else {
            self.config.flat_rate
        }
    }

    async fn issue_label(&self, order: &Order) -> Result<ShippingLabel, AppError> {
        let tracking_number = format!(
            "TRK{}",
            Uuid::new_v4().simple().to_string()[..12].to_uppercase()
        );
        let label_url = format!(
            "{}/labels/{}.pdf",
            self.config.label_base_url.trim_end_matches('/'),
            tracking_number
        );

        tracing::info!(
            order_id = %order.id,
            tracking_number = %tracking_number,
            carrier = %self.config.carrier,
            "Shipping label issued"
        );

        Ok(ShippingLabel {
            tracking_number,
            carrier: self.config.carrier.clone(),
            label_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> FlatRateShipping {
        FlatRateShipping::new(ShippingConfig {
            flat_rate: Decimal::new(100, 0),
            free_shipping_threshold: Decimal::new(2000, 0),
            carrier: "Local Courier".to_string(),
            label_base_url: "https://labels.test/".to_string(),
        })
    }

    #[test]
    fn shipping_is_free_at_threshold() {
        let shipping = provider();
        assert_eq!(shipping.quote(Decimal::new(1999, 0)), Decimal::new(100, 0));
        assert_eq!(shipping.quote(Decimal::new(2000, 0)), Decimal::ZERO);
    }
}

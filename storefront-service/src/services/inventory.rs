//! Inventory ledger: atomic per-variant reserve and release.

use service_core::error::AppError;
use std::sync::Arc;
use thiserror::Error;

use crate::models::VariantKey;
use crate::services::metrics;
use crate::services::notifications::{NewNotification, Notifier};
use crate::services::repository::{ProductRepository, StockUpdate};

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Insufficient stock for {key}: requested {requested}, available {available}")]
    InsufficientStock {
        key: VariantKey,
        requested: i64,
        available: i64,
    },

    #[error("Variant {0} not found")]
    VariantNotFound(VariantKey),

    #[error("Quantity must be positive, got {0}")]
    InvalidQuantity(i64),

    #[error(transparent)]
    Store(#[from] AppError),
}

impl From<InventoryError> for AppError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::InsufficientStock { .. } => AppError::Conflict(err.into()),
            InventoryError::VariantNotFound(_) => AppError::NotFound(err.into()),
            InventoryError::InvalidQuantity(_) => AppError::BadRequest(err.into()),
            InventoryError::Store(inner) => inner,
        }
    }
}

/// A successful decrement, kept so it can be compensated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub key: VariantKey,
    pub quantity: i64,
    pub remaining: i64,
}

#[derive(Clone)]
pub struct InventoryLedger {
    products: Arc<dyn ProductRepository>,
    notifier: Notifier,
    low_stock_threshold: i64,
}

impl InventoryLedger {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        notifier: Notifier,
        low_stock_threshold: i64,
    ) -> Self {
        Self {
            products,
            notifier,
            low_stock_threshold,
        }
    }

    /// Decrement the variant's stock by `quantity` if enough remains.
    ///
    /// The check and the decrement are one conditional update in the store,
    /// so two callers racing for the last unit cannot both succeed.
    pub async fn reserve(
        &self,
        key: &VariantKey,
        quantity: i64,
    ) -> Result<Reservation, InventoryError> {
        if quantity <= 0 {
            return Err(InventoryError::InvalidQuantity(quantity));
        }

        match self.products.decrement_stock(key, quantity).await? {
            StockUpdate::Applied { remaining } => {
                tracing::debug!(variant = %key, quantity, remaining, "Stock reserved");
                if remaining <= self.low_stock_threshold {
                    metrics::record_low_stock_alert();
                    tracing::info!(variant = %key, remaining, "Variant at low stock");
                    self.notifier.notify(NewNotification::low_stock(key, remaining));
                }
                Ok(Reservation {
                    key: key.clone(),
                    quantity,
                    remaining,
                })
            }
            StockUpdate::Insufficient { available } => Err(InventoryError::InsufficientStock {
                key: key.clone(),
                requested: quantity,
                available,
            }),
            StockUpdate::VariantNotFound => Err(InventoryError::VariantNotFound(key.clone())),
        }
    }

    pub async fn release(&self, key: &VariantKey, quantity: i64) -> Result<(), AppError> {
        self.products.increment_stock(key, quantity).await?;
        tracing::debug!(variant = %key, quantity, "Stock released");
        Ok(())
    }

    /// Put back every `(variant, quantity)` pair. Failures are logged and the
    /// remaining pairs are still released.
    pub async fn release_all<I>(&self, lines: I)
    where
        I: IntoIterator<Item = (VariantKey, i64)>,
    {
        for (key, quantity) in lines {
            if let Err(e) = self.release(&key, quantity).await {
                tracing::error!(
                    error = %e,
                    variant = %key,
                    quantity,
                    "Failed to release reserved stock"
                );
            }
        }
    }
}

impl Reservation {
    pub fn into_line(self) -> (VariantKey, i64) {
        (self.key, self.quantity)
    }
}

//! Khalti ePayment: server-side initiation and lookup.
//!
//! The redirect back from Khalti is never trusted on its own; only a
//! `Completed` answer from the lookup endpoint confirms a payment.

use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use super::{verification_error, PaymentError};
use crate::config::KhaltiConfig;

pub const STATUS_COMPLETED: &str = "Completed";

#[derive(Debug, Serialize)]
pub struct KhaltiCustomerInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct KhaltiInitiateRequest {
    pub return_url: String,
    pub website_url: String,
    /// Paisa.
    pub amount: i64,
    pub purchase_order_id: String,
    pub purchase_order_name: String,
    pub customer_info: KhaltiCustomerInfo,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KhaltiInitiateResponse {
    pub pidx: String,
    pub payment_url: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KhaltiLookup {
    pub pidx: String,
    /// Paisa.
    pub total_amount: i64,
    pub status: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

impl KhaltiLookup {
    pub fn is_completed(&self) -> bool {
        self.status == STATUS_COMPLETED
    }
}

#[derive(Clone)]
pub struct KhaltiClient {
    client: Client,
    config: KhaltiConfig,
}

impl KhaltiClient {
    pub fn new(config: KhaltiConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Khalti HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn website_url(&self) -> &str {
        &self.config.website_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    fn auth_header(&self) -> String {
        format!("Key {}", self.config.secret_key.expose_secret())
    }

    pub async fn initiate(
        &self,
        request: &KhaltiInitiateRequest,
    ) -> Result<KhaltiInitiateResponse, PaymentError> {
        let response = self
            .client
            .post(self.url("epayment/initiate/"))
            .header("Authorization", self.auth_header())
            .json(request)
            .send()
            .await
            .map_err(|e| PaymentError::Upstream(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::Upstream(e.to_string()))?;

        if !status.is_success() {
            tracing::warn!(status = %status, body = %body, "Khalti initiate rejected");
            return Err(PaymentError::Upstream(format!(
                "initiate returned {}",
                status
            )));
        }

        let initiated: KhaltiInitiateResponse = serde_json::from_str(&body)
            .map_err(|e| PaymentError::Upstream(format!("unexpected initiate response: {}", e)))?;

        tracing::info!(
            purchase_order_id = %request.purchase_order_id,
            pidx = %initiated.pidx,
            amount = request.amount,
            "Khalti payment initiated"
        );
        Ok(initiated)
    }

    /// Authoritative payment state for `pidx`. Timeouts and transport errors
    /// come back as [`PaymentError::VerificationFailed`].
    pub async fn lookup(&self, pidx: &str) -> Result<KhaltiLookup, PaymentError> {
        let response = self
            .client
            .post(self.url("epayment/lookup/"))
            .header("Authorization", self.auth_header())
            .json(&serde_json::json!({ "pidx": pidx }))
            .send()
            .await
            .map_err(verification_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(pidx = %pidx, status = %status, body = %body, "Khalti lookup rejected");
            return Err(PaymentError::VerificationFailed(format!(
                "lookup returned {}",
                status
            )));
        }

        let lookup: KhaltiLookup = response.json().await.map_err(verification_error)?;
        tracing::debug!(pidx = %pidx, status = %lookup.status, "Khalti lookup");
        Ok(lookup)
    }
}

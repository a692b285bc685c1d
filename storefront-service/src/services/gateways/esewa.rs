//! eSewa ePay v2: signed form post out, base64 JSON payload back.
//!
//! Signatures are `base64(HMAC-SHA256(secret, "k1=v1,k2=v2,..."))` over the
//! fields listed in `signed_field_names`, in that order.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use service_core::error::AppError;
use sha2::Sha256;
use std::str::FromStr;

use super::{verification_error, PaymentError};
use crate::config::EsewaConfig;
use crate::models::Order;

type HmacSha256 = Hmac<Sha256>;

const REQUEST_SIGNED_FIELDS: &str = "total_amount,transaction_uuid,product_code";

/// Fields the shopper's browser posts to the eSewa form URL.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EsewaFormFields {
    pub amount: String,
    pub tax_amount: String,
    pub total_amount: String,
    pub transaction_uuid: String,
    pub product_code: String,
    pub product_service_charge: String,
    pub product_delivery_charge: String,
    pub success_url: String,
    pub failure_url: String,
    pub signed_field_names: String,
    pub signature: String,
}

/// Decoded success-redirect payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EsewaCallback {
    pub transaction_code: String,
    pub status: String,
    pub total_amount: Decimal,
    /// Exactly as received, for the status-check query.
    pub total_amount_raw: String,
    /// The order id the payment was initiated for.
    pub transaction_uuid: String,
    pub product_code: Option<String>,
    /// Whether a signature was present and verified.
    pub signed: bool,
}

#[derive(Debug, Deserialize)]
pub struct EsewaStatus {
    pub status: String,
    #[serde(default)]
    pub ref_id: Option<String>,
}

#[derive(Clone)]
pub struct EsewaClient {
    client: Client,
    config: EsewaConfig,
}

impl EsewaClient {
    pub fn new(config: EsewaConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("eSewa HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn form_url(&self) -> &str {
        &self.config.form_url
    }

    pub fn verify_with_lookup(&self) -> bool {
        self.config.verify_with_lookup
    }

    fn sign(&self, message: &str) -> Result<String, PaymentError> {
        let mut mac = HmacSha256::new_from_slice(self.config.secret_key.expose_secret().as_bytes())
            .map_err(|_| PaymentError::Upstream("invalid eSewa secret key".to_string()))?;
        mac.update(message.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    fn verify_signature(&self, message: &str, signature: &str) -> Result<(), PaymentError> {
        let expected = STANDARD
            .decode(signature.trim())
            .map_err(|_| PaymentError::InvalidSignature)?;
        let mut mac = HmacSha256::new_from_slice(self.config.secret_key.expose_secret().as_bytes())
            .map_err(|_| PaymentError::Upstream("invalid eSewa secret key".to_string()))?;
        mac.update(message.as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| PaymentError::InvalidSignature)
    }

    /// Signed form fields for paying `order`.
    pub fn form_fields(
        &self,
        order: &Order,
        success_url: String,
        failure_url: String,
    ) -> Result<EsewaFormFields, PaymentError> {
        let total_amount = order.total_price.normalize().to_string();
        let message = format!(
            "total_amount={},transaction_uuid={},product_code={}",
            total_amount, order.id, self.config.product_code
        );
        let signature = self.sign(&message)?;

        Ok(EsewaFormFields {
            amount: total_amount.clone(),
            tax_amount: "0".to_string(),
            total_amount,
            transaction_uuid: order.id.clone(),
            product_code: self.config.product_code.clone(),
            product_service_charge: "0".to_string(),
            product_delivery_charge: "0".to_string(),
            success_url,
            failure_url,
            signed_field_names: REQUEST_SIGNED_FIELDS.to_string(),
            signature,
        })
    }

    /// Decode the `data` query parameter of the success redirect.
    ///
    /// When the payload names signed fields and carries a signature, the
    /// signature must verify.
    pub fn decode_callback(&self, encoded: &str) -> Result<EsewaCallback, PaymentError> {
        // Query decoding may have turned '+' into ' '.
        let normalized = encoded.trim().replace(' ', "+");
        let bytes = STANDARD
            .decode(normalized.as_bytes())
            .map_err(|e| PaymentError::MalformedPayload(format!("invalid base64: {}", e)))?;
        let fields: Map<String, Value> = serde_json::from_slice(&bytes)
            .map_err(|e| PaymentError::MalformedPayload(format!("invalid JSON: {}", e)))?;

        let field = |name: &str| fields.get(name).and_then(value_as_string);
        let required = |name: &str| {
            field(name).ok_or_else(|| PaymentError::MalformedPayload(format!("missing {}", name)))
        };

        let transaction_uuid = required("transaction_uuid")?;
        let status = required("status")?;
        let total_amount_raw = required("total_amount")?;
        let transaction_code = field("transaction_code").unwrap_or_default();
        let total_amount = Decimal::from_str(&total_amount_raw.replace(',', ""))
            .map_err(|_| PaymentError::MalformedPayload("invalid total_amount".to_string()))?;

        let signed = match (field("signed_field_names"), field("signature")) {
            (Some(names), Some(signature)) => {
                let message = names
                    .split(',')
                    .map(|name| format!("{}={}", name, field(name).unwrap_or_default()))
                    .collect::<Vec<_>>()
                    .join(",");
                self.verify_signature(&message, &signature)?;
                true
            }
            _ => false,
        };

        Ok(EsewaCallback {
            transaction_code,
            status,
            total_amount,
            total_amount_raw,
            transaction_uuid,
            product_code: field("product_code"),
            signed,
        })
    }

    /// Ask eSewa's status-check API for the authoritative state of a transaction.
    pub async fn check_status(
        &self,
        transaction_uuid: &str,
        total_amount: &str,
    ) -> Result<EsewaStatus, PaymentError> {
        let response = self
            .client
            .get(&self.config.status_url)
            .query(&[
                ("product_code", self.config.product_code.as_str()),
                ("total_amount", total_amount),
                ("transaction_uuid", transaction_uuid),
            ])
            .send()
            .await
            .map_err(verification_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "eSewa status check rejected");
            return Err(PaymentError::VerificationFailed(format!(
                "status check returned {}",
                status
            )));
        }

        let result: EsewaStatus = response.json().await.map_err(verification_error)?;
        tracing::debug!(
            transaction_uuid = %transaction_uuid,
            status = %result.status,
            "eSewa status check"
        );
        Ok(result)
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALLBACK_FIELDS: &str =
        "transaction_code,status,total_amount,transaction_uuid,product_code,signed_field_names";
    use secrecy::Secret;

    fn client() -> EsewaClient {
        EsewaClient::new(EsewaConfig {
            product_code: "EPAYTEST".to_string(),
            secret_key: Secret::new("8gBm/:&EnhH.1/q".to_string()),
            form_url: "https://rc-epay.esewa.com.np/api/epay/main/v2/form".to_string(),
            status_url: "http://localhost/status".to_string(),
            verify_with_lookup: true,
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn encode(value: serde_json::Value) -> String {
        STANDARD.encode(value.to_string())
    }

    #[test]
    fn signature_is_base64_hmac_sha256() {
        let signature = client()
            .sign("total_amount=100,transaction_uuid=11-201-13,product_code=EPAYTEST")
            .unwrap();
        assert_eq!(signature, "5DZywcrTKD0gia/rsSMcrRHmJl+4Tbol6S+lWgdJ94E=");
    }

    #[test]
    fn unsigned_payload_decodes() {
        let data = encode(serde_json::json!({
            "transaction_code": "000AWEO",
            "status": "COMPLETE",
            "total_amount": "1,500.0",
            "transaction_uuid": "order-1",
        }));

        let callback = client().decode_callback(&data).unwrap();
        assert_eq!(callback.transaction_uuid, "order-1");
        assert_eq!(callback.status, "COMPLETE");
        assert_eq!(callback.total_amount, Decimal::new(1500, 0));
        assert!(!callback.signed);
    }

    #[test]
    fn signed_payload_is_verified() {
        let esewa = client();
        let message = format!(
            "transaction_code=000AWEO,status=COMPLETE,total_amount=1000.0,\
             transaction_uuid=order-1,product_code=EPAYTEST,signed_field_names={}",
            CALLBACK_FIELDS
        );
        let signature = esewa.sign(&message).unwrap();
        let payload = serde_json::json!({
            "transaction_code": "000AWEO",
            "status": "COMPLETE",
            "total_amount": 1000.0,
            "transaction_uuid": "order-1",
            "product_code": "EPAYTEST",
            "signed_field_names": CALLBACK_FIELDS,
            "signature": signature,
        });

        let callback = esewa.decode_callback(&encode(payload)).unwrap();
        assert!(callback.signed);
        assert_eq!(callback.total_amount, Decimal::new(1000, 0));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let esewa = client();
        let signature = esewa
            .sign(&format!(
                "transaction_code=X,status=PENDING,total_amount=10,\
                 transaction_uuid=order-1,product_code=EPAYTEST,signed_field_names={}",
                CALLBACK_FIELDS
            ))
            .unwrap();
        let payload = serde_json::json!({
            "transaction_code": "X",
            "status": "COMPLETE",
            "total_amount": "10",
            "transaction_uuid": "order-1",
            "product_code": "EPAYTEST",
            "signed_field_names": CALLBACK_FIELDS,
            "signature": signature,
        });

        assert!(matches!(
            esewa.decode_callback(&encode(payload)),
            Err(PaymentError::InvalidSignature)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            client().decode_callback("not base64!!"),
            Err(PaymentError::MalformedPayload(_))
        ));
        assert!(matches!(
            client().decode_callback(&STANDARD.encode("[1,2]")),
            Err(PaymentError::MalformedPayload(_))
        ));
    }
}

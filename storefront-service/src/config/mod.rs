use rust_decimal::Decimal;
use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Public eSewa UAT key, only usable outside production.
const ESEWA_SANDBOX_SECRET: &str = "8gBm/:&EnhH.1/q";

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub inventory: InventoryConfig,
    pub shipping: ShippingConfig,
    pub notifications: NotificationConfig,
    pub esewa: EsewaConfig,
    pub khalti: KhaltiConfig,
    pub smtp: SmtpConfig,
    /// Base URL of the shopper-facing site; gateway callbacks redirect here.
    pub frontend_url: String,
    /// Externally reachable base URL of this service, used for gateway return URLs.
    pub public_url: String,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Mongo(DatabaseConfig),
    Memory,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct InventoryConfig {
    /// A reservation leaving a variant at or below this level raises a low-stock alert.
    pub low_stock_threshold: i64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ShippingConfig {
    pub flat_rate: Decimal,
    pub free_shipping_threshold: Decimal,
    pub carrier: String,
    pub label_base_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct NotificationConfig {
    pub queue_capacity: usize,
    pub page_size: i64,
}

/// Gateway A: signed-redirect (eSewa ePay v2).
#[derive(Deserialize, Clone, Debug)]
pub struct EsewaConfig {
    pub product_code: String,
    pub secret_key: Secret<String>,
    pub form_url: String,
    pub status_url: String,
    /// Confirm every callback against the status-check API before marking paid.
    pub verify_with_lookup: bool,
    pub timeout_secs: u64,
}

impl EsewaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Gateway B: lookup-verified (Khalti ePayment).
#[derive(Deserialize, Clone, Debug)]
pub struct KhaltiConfig {
    pub secret_key: Secret<String>,
    pub api_base_url: String,
    pub website_url: String,
    pub timeout_secs: u64,
}

impl KhaltiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
    pub from_name: String,
    pub enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let host = get_env("STOREFRONT_HOST", Some("0.0.0.0"), is_prod)?;
        let port = parse_env("STOREFRONT_PORT", "3010")?;

        let storage = match get_env("STOREFRONT_STORAGE", Some("mongo"), is_prod)?.as_str() {
            "memory" => StorageConfig::Memory,
            "mongo" => StorageConfig::Mongo(DatabaseConfig {
                url: Secret::new(get_env("STOREFRONT_DATABASE_URL", None, is_prod)?),
                db_name: get_env("STOREFRONT_DATABASE_NAME", Some("storefront_db"), is_prod)?,
            }),
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Unknown storage backend '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            common,
            server: ServerConfig { host, port },
            storage,
            inventory: InventoryConfig {
                low_stock_threshold: parse_env("STOREFRONT_LOW_STOCK_THRESHOLD", "5")?,
            },
            shipping: ShippingConfig {
                flat_rate: parse_env("STOREFRONT_SHIPPING_FLAT_RATE", "100")?,
                free_shipping_threshold: parse_env("STOREFRONT_FREE_SHIPPING_THRESHOLD", "2000")?,
                carrier: get_env("STOREFRONT_SHIPPING_CARRIER", Some("Local Courier"), is_prod)?,
                label_base_url: get_env(
                    "STOREFRONT_LABEL_BASE_URL",
                    Some("https://labels.example.com"),
                    is_prod,
                )?,
            },
            notifications: NotificationConfig {
                queue_capacity: parse_env("STOREFRONT_NOTIFICATION_QUEUE", "1024")?,
                page_size: parse_env("STOREFRONT_NOTIFICATION_PAGE_SIZE", "50")?,
            },
            esewa: EsewaConfig {
                product_code: get_env("ESEWA_PRODUCT_CODE", Some("EPAYTEST"), is_prod)?,
                secret_key: Secret::new(get_env(
                    "ESEWA_SECRET_KEY",
                    dev_default(ESEWA_SANDBOX_SECRET, is_prod),
                    is_prod,
                )?),
                form_url: get_env(
                    "ESEWA_FORM_URL",
                    Some("https://rc-epay.esewa.com.np/api/epay/main/v2/form"),
                    is_prod,
                )?,
                status_url: get_env(
                    "ESEWA_STATUS_URL",
                    Some("https://rc.esewa.com.np/api/epay/transaction/status/"),
                    is_prod,
                )?,
                verify_with_lookup: parse_env("ESEWA_VERIFY_WITH_LOOKUP", "true")?,
                timeout_secs: parse_env("ESEWA_TIMEOUT_SECS", "10")?,
            },
            khalti: KhaltiConfig {
                secret_key: Secret::new(get_env("KHALTI_SECRET_KEY", Some(""), is_prod)?),
                api_base_url: get_env(
                    "KHALTI_API_BASE_URL",
                    Some("https://dev.khalti.com/api/v2"),
                    is_prod,
                )?,
                website_url: get_env("KHALTI_WEBSITE_URL", Some("http://localhost:3000"), is_prod)?,
                timeout_secs: parse_env("KHALTI_TIMEOUT_SECS", "10")?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), is_prod)?,
                port: parse_env("SMTP_PORT", "587")?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: Secret::new(get_env("SMTP_PASSWORD", Some(""), is_prod)?),
                from_email: get_env("SMTP_FROM_EMAIL", Some("noreply@example.com"), is_prod)?,
                from_name: get_env("SMTP_FROM_NAME", Some("Storefront"), is_prod)?,
                enabled: parse_env("SMTP_ENABLED", "false")?,
            },
            frontend_url: get_env(
                "STOREFRONT_FRONTEND_URL",
                Some("http://localhost:3000"),
                is_prod,
            )?,
            public_url: get_env("STOREFRONT_PUBLIC_URL", Some("http://localhost:3010"), is_prod)?,
            service_name: "storefront-service".to_string(),
        })
    }
}

/// A fallback that only applies outside production.
fn dev_default(value: &'static str, is_prod: bool) -> Option<&'static str> {
    (!is_prod).then_some(value)
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod && default.is_none() {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e))
    })
}

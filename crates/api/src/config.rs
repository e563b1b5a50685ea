//! Application configuration loaded from environment variables.

use std::time::Duration;

use checkout::GatewayError;
use thiserror::Error;

/// A configuration value is missing or malformed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("no payment provider configured for a persistent store; set provider credentials or PAYMENT_SIMULATOR=true")]
    NoPaymentProvider,

    #[error("payment gateway setup failed: {0}")]
    Gateway(#[from] GatewayError),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EversendSettings {
    pub api_key: String,
    pub base_url: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayPalSettings {
    pub client_id: String,
    pub secret: String,
    pub base_url: String,
    pub webhook_secret: String,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` (default `"0.0.0.0"`), `PORT` (default `3000`)
/// - `RUST_LOG` (default `"info"`), `LOG_FORMAT` (`text` or `json`)
/// - `DATABASE_URL` (absent: in-memory store), `DATABASE_MAX_CONNECTIONS` (default `10`)
/// - `JWT_SECRET` (required)
/// - `PAYMENT_TIMEOUT_SECS` (default `30`), `PAYMENT_POLL_INTERVAL_SECS` (default `60`)
/// - `PAYMENT_CALLBACK_URL`
/// - `PAYMENT_SIMULATOR` (default `false`): allow simulated gateways with a database
/// - `EVERSEND_API_KEY`, `EVERSEND_BASE_URL`, `EVERSEND_WEBHOOK_SECRET`
/// - `PAYPAL_CLIENT_ID`, `PAYPAL_SECRET`, `PAYPAL_BASE_URL`, `PAYPAL_WEBHOOK_SECRET`
///
/// A provider is enabled when its credentials are present; its webhook
/// secret is then required. Without any provider, simulated gateways are only
/// used for the in-memory store or when `PAYMENT_SIMULATOR` is set.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub payment_timeout: Duration,
    pub poll_interval: Duration,
    pub callback_url: Option<String>,
    pub payment_simulator: bool,
    pub eversend: Option<EversendSettings>,
    pub paypal: Option<PayPalSettings>,
}

const EVERSEND_DEFAULT_URL: &str = "https://api.eversend.co/v1";
const PAYPAL_DEFAULT_URL: &str = "https://api-m.sandbox.paypal.com";

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, treating blank values as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("text") | Some("pretty") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LOG_FORMAT",
                    value: other.to_string(),
                });
            }
        };

        let eversend = match get("EVERSEND_API_KEY") {
            Some(api_key) => Some(EversendSettings {
                api_key,
                base_url: get("EVERSEND_BASE_URL").unwrap_or_else(|| EVERSEND_DEFAULT_URL.into()),
                webhook_secret: get("EVERSEND_WEBHOOK_SECRET")
                    .ok_or(ConfigError::Missing("EVERSEND_WEBHOOK_SECRET"))?,
            }),
            None => None,
        };

        let paypal = match (get("PAYPAL_CLIENT_ID"), get("PAYPAL_SECRET")) {
            (Some(client_id), Some(secret)) => Some(PayPalSettings {
                client_id,
                secret,
                base_url: get("PAYPAL_BASE_URL").unwrap_or_else(|| PAYPAL_DEFAULT_URL.into()),
                webhook_secret: get("PAYPAL_WEBHOOK_SECRET")
                    .ok_or(ConfigError::Missing("PAYPAL_WEBHOOK_SECRET"))?,
            }),
            (Some(_), None) => return Err(ConfigError::Missing("PAYPAL_SECRET")),
            (None, Some(_)) => return Err(ConfigError::Missing("PAYPAL_CLIENT_ID")),
            (None, None) => None,
        };

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse(&get, "PORT", 3000)?,
            log_level: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            log_format,
            database_url: get("DATABASE_URL"),
            database_max_connections: parse(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            jwt_secret: get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?,
            payment_timeout: Duration::from_secs(parse(&get, "PAYMENT_TIMEOUT_SECS", 30)?),
            poll_interval: Duration::from_secs(parse(&get, "PAYMENT_POLL_INTERVAL_SECS", 60)?),
            callback_url: get("PAYMENT_CALLBACK_URL"),
            payment_simulator: parse(&get, "PAYMENT_SIMULATOR", false)?,
            eversend,
            paypal,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns true if at least one real payment provider is configured.
    pub fn has_payment_provider(&self) -> bool {
        self.eversend.is_some() || self.paypal.is_some()
    }

    /// Returns true if simulated gateways may stand in for missing providers.
    pub fn allows_simulated_payments(&self) -> bool {
        self.payment_simulator || self.database_url.is_none()
    }
}

fn parse<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[("JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.database_url, None);
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.payment_timeout, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert!(!config.has_payment_provider());
        assert!(config.allows_simulated_payments());
    }

    #[test]
    fn test_simulator_requires_opt_in_with_database() {
        let config = load(&[("JWT_SECRET", "s"), ("DATABASE_URL", "postgres://db/shop")]).unwrap();
        assert!(!config.allows_simulated_payments());

        let config = load(&[
            ("JWT_SECRET", "s"),
            ("DATABASE_URL", "postgres://db/shop"),
            ("PAYMENT_SIMULATOR", "true"),
        ])
        .unwrap();
        assert!(config.allows_simulated_payments());

        let err = load(&[("JWT_SECRET", "s"), ("PAYMENT_SIMULATOR", "yes")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PAYMENT_SIMULATOR", .. }));
    }

    #[test]
    fn test_jwt_secret_required() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing("JWT_SECRET"))));
    }

    #[test]
    fn test_addr_formatting() {
        let config = load(&[("JWT_SECRET", "s"), ("HOST", "127.0.0.1"), ("PORT", "8080")]).unwrap();
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_invalid_number() {
        let err = load(&[("JWT_SECRET", "s"), ("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }

    #[test]
    fn test_providers_from_credentials() {
        let config = load(&[
            ("JWT_SECRET", "s"),
            ("LOG_FORMAT", "json"),
            ("EVERSEND_API_KEY", "ev-key"),
            ("EVERSEND_WEBHOOK_SECRET", "ev-hook"),
            ("PAYPAL_CLIENT_ID", "pp-id"),
            ("PAYPAL_SECRET", "pp-secret"),
            ("PAYPAL_WEBHOOK_SECRET", "pp-hook"),
            ("PAYPAL_BASE_URL", "https://api-m.paypal.com"),
        ])
        .unwrap();

        assert_eq!(config.log_format, LogFormat::Json);
        let eversend = config.eversend.unwrap();
        assert_eq!(eversend.base_url, EVERSEND_DEFAULT_URL);
        assert_eq!(eversend.webhook_secret, "ev-hook");
        assert_eq!(config.paypal.unwrap().base_url, "https://api-m.paypal.com");
    }

    #[test]
    fn test_provider_requires_webhook_secret() {
        let err = load(&[("JWT_SECRET", "s"), ("EVERSEND_API_KEY", "k")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("EVERSEND_WEBHOOK_SECRET")));

        let err = load(&[("JWT_SECRET", "s"), ("PAYPAL_CLIENT_ID", "id")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("PAYPAL_SECRET")));
    }
}

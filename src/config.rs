// config.rs
use std::env;
use std::fmt;
use std::str::FromStr;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
const PRODUCTION_BASE_URL: &str = "https://api.safaricom.co.ke";

// Daraja's published sandbox test values.
const SANDBOX_SHORT_CODE: &str = "174379";
const SANDBOX_PASSKEY: &str = "bfb279f9aa9bdbcf158e97dd71a467cd2e0c893059b10f78e6b72ada1ed2c919";
const SANDBOX_INITIATOR: &str = "testapi";

// Safaricom's callback source addresses.
const SAFARICOM_CALLBACK_IPS: [&str; 5] = [
    "196.201.214.200",
    "196.201.214.206",
    "196.201.213.114",
    "196.201.214.207",
    "196.201.214.208",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Sandbox => "sandbox",
            Environment::Production => "production",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            Environment::Sandbox => "MPESA_SANDBOX",
            Environment::Production => "MPESA_PROD",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials for one Daraja environment. Only the consumer pair is required
/// to exist; the rest is checked by the operation that needs it.
#[derive(Debug, Clone, Default)]
pub struct MpesaCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub short_code: Option<String>,
    pub passkey: Option<String>,
    pub initiator_name: Option<String>,
    pub security_credential: Option<String>,
}

impl MpesaCredentials {
    pub fn short_code(&self) -> Result<&str> {
        self.short_code
            .as_deref()
            .ok_or_else(|| AppError::configuration("Business short code not configured"))
    }

    pub fn passkey(&self) -> Result<&str> {
        self.passkey
            .as_deref()
            .ok_or_else(|| AppError::configuration("Passkey not configured"))
    }

    pub fn initiator_name(&self) -> Result<&str> {
        self.initiator_name
            .as_deref()
            .ok_or_else(|| AppError::configuration("Initiator name not configured"))
    }

    pub fn security_credential(&self) -> Result<&str> {
        self.security_credential
            .as_deref()
            .ok_or_else(|| AppError::configuration("Security credential not configured"))
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sandbox: Option<MpesaCredentials>,
    pub production: Option<MpesaCredentials>,
    pub sandbox_base_url: String,
    pub production_base_url: String,
    /// Public base URL the provider calls back into.
    pub callback_base_url: String,
    pub validate_callback_ip: bool,
    pub callback_ip_allowlist: Vec<String>,
    pub upsert_customers_on_settle: bool,
    pub cache_tokens: bool,
    pub http_timeout_secs: u64,
    pub utc_offset_minutes: i32,
    pub provider_utc_offset_minutes: i32,
    pub database_url: String,
    pub database_name: String,
    pub database_timeout_secs: u64,
    pub port: u16,
    pub host: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            sandbox: None,
            production: None,
            sandbox_base_url: SANDBOX_BASE_URL.to_string(),
            production_base_url: PRODUCTION_BASE_URL.to_string(),
            callback_base_url: "http://localhost:3000".to_string(),
            validate_callback_ip: false,
            callback_ip_allowlist: SAFARICOM_CALLBACK_IPS.iter().map(|ip| ip.to_string()).collect(),
            upsert_customers_on_settle: true,
            cache_tokens: true,
            http_timeout_secs: 30,
            utc_offset_minutes: 0,
            provider_utc_offset_minutes: 180,
            database_url: "mongodb://localhost:27017".to_string(),
            database_name: "mpesa".to_string(),
            database_timeout_secs: 10,
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = AppConfig::default();

        let config = AppConfig {
            sandbox: credentials_from_env(Environment::Sandbox),
            production: credentials_from_env(Environment::Production),
            sandbox_base_url: env::var("MPESA_SANDBOX_BASE_URL").unwrap_or(defaults.sandbox_base_url),
            production_base_url: env::var("MPESA_PROD_BASE_URL").unwrap_or(defaults.production_base_url),
            callback_base_url: env::var("CALLBACK_BASE_URL").unwrap_or(defaults.callback_base_url),
            validate_callback_ip: parse_var("MPESA_VALIDATE_IP", defaults.validate_callback_ip)?,
            callback_ip_allowlist: env::var("MPESA_CALLBACK_IPS")
                .map(|ips| {
                    ips.split(',')
                        .map(|ip| ip.trim().to_string())
                        .filter(|ip| !ip.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.callback_ip_allowlist),
            upsert_customers_on_settle: parse_var(
                "MPESA_UPSERT_CUSTOMERS_ON_SETTLE",
                defaults.upsert_customers_on_settle,
            )?,
            cache_tokens: parse_var("MPESA_CACHE_TOKENS", defaults.cache_tokens)?,
            http_timeout_secs: parse_var("MPESA_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
            utc_offset_minutes: parse_var("APP_UTC_OFFSET_MINUTES", defaults.utc_offset_minutes)?,
            provider_utc_offset_minutes: parse_var(
                "MPESA_PROVIDER_UTC_OFFSET_MINUTES",
                defaults.provider_utc_offset_minutes,
            )?,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| AppError::configuration("DATABASE_URL must be set"))?,
            database_name: env::var("DATABASE_NAME").unwrap_or(defaults.database_name),
            database_timeout_secs: parse_var("DATABASE_TIMEOUT_SECS", defaults.database_timeout_secs)?,
            port: parse_var("PORT", defaults.port)?,
            host: env::var("HOST").unwrap_or(defaults.host),
        };

        // Offsets must be representable before any request relies on them.
        config.local_offset()?;
        config.provider_offset()?;

        Ok(config)
    }

    /// Credentials for `environment`, or a configuration error naming it.
    pub fn credentials(&self, environment: Environment) -> Result<&MpesaCredentials> {
        let credentials = match environment {
            Environment::Sandbox => self.sandbox.as_ref(),
            Environment::Production => self.production.as_ref(),
        };
        credentials.ok_or_else(|| {
            AppError::configuration(format!("M-Pesa {} credentials not configured", environment))
        })
    }

    pub fn base_url(&self, environment: Environment) -> &str {
        let url = match environment {
            Environment::Sandbox => &self.sandbox_base_url,
            Environment::Production => &self.production_base_url,
        };
        url.trim_end_matches('/')
    }

    pub fn callback_url(&self, path: &str) -> String {
        format!("{}{}", self.callback_base_url.trim_end_matches('/'), path)
    }

    pub fn is_allowed_callback_ip(&self, ip: &str) -> bool {
        self.callback_ip_allowlist.iter().any(|allowed| allowed == ip)
    }

    /// Timezone used to decide which calendar day "today" is.
    pub fn local_offset(&self) -> Result<FixedOffset> {
        offset_from_minutes(self.utc_offset_minutes)
    }

    /// Timezone of the timestamps the provider embeds in callbacks.
    pub fn provider_offset(&self) -> Result<FixedOffset> {
        offset_from_minutes(self.provider_utc_offset_minutes)
    }

    pub fn get_config_info(&self) -> serde_json::Value {
        serde_json::json!({
            "sandbox_configured": self.sandbox.is_some(),
            "production_configured": self.production.is_some(),
            "sandbox_base_url": self.sandbox_base_url,
            "production_base_url": self.production_base_url,
            "callback_base_url": self.callback_base_url,
            "validate_callback_ip": self.validate_callback_ip,
            "upsert_customers_on_settle": self.upsert_customers_on_settle,
            "cache_tokens": self.cache_tokens,
            "utc_offset_minutes": self.utc_offset_minutes,
            "port": self.port,
            "host": self.host,
        })
    }
}

fn credentials_from_env(environment: Environment) -> Option<MpesaCredentials> {
    let prefix = environment.env_prefix();
    let var = |name: &str| env::var(format!("{}_{}", prefix, name)).ok().filter(|v| !v.is_empty());

    let consumer_key = var("CONSUMER_KEY")?;
    let consumer_secret = var("CONSUMER_SECRET")?;

    let sandbox = environment == Environment::Sandbox;
    let fallback = |value: &str| sandbox.then(|| value.to_string());

    Some(MpesaCredentials {
        consumer_key,
        consumer_secret,
        short_code: var("SHORTCODE").or_else(|| fallback(SANDBOX_SHORT_CODE)),
        passkey: var("PASSKEY").or_else(|| fallback(SANDBOX_PASSKEY)),
        initiator_name: var("INITIATOR_NAME").or_else(|| fallback(SANDBOX_INITIATOR)),
        security_credential: var("SECURITY_CREDENTIAL"),
    })
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::configuration(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

fn offset_from_minutes(minutes: i32) -> Result<FixedOffset> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| AppError::configuration(format!("UTC offset out of range: {} minutes", minutes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_environment_credentials_is_a_configuration_error() {
        let config = AppConfig::default();
        let err = config.credentials(Environment::Production).unwrap_err();
        assert!(matches!(err, AppError::ConfigurationError(_)));
        assert_eq!(
            err.to_string(),
            "Configuration error: M-Pesa production credentials not configured"
        );
    }

    #[test]
    fn credentials_are_resolved_per_environment() {
        let config = AppConfig {
            sandbox: Some(MpesaCredentials {
                consumer_key: "sandbox-key".to_string(),
                consumer_secret: "sandbox-secret".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(config.credentials(Environment::Sandbox).unwrap().consumer_key, "sandbox-key");
        assert!(config.credentials(Environment::Production).is_err());
    }

    #[test]
    fn base_url_strips_trailing_slash() {
        let config = AppConfig {
            sandbox_base_url: "http://127.0.0.1:9000/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.base_url(Environment::Sandbox), "http://127.0.0.1:9000");
        assert_eq!(config.base_url(Environment::Production), "https://api.safaricom.co.ke");
    }

    #[test]
    fn callback_ip_allowlist_defaults_to_safaricom() {
        let config = AppConfig::default();
        assert!(config.is_allowed_callback_ip("196.201.214.200"));
        assert!(!config.is_allowed_callback_ip("10.0.0.1"));
    }

    #[test]
    fn offsets_outside_a_day_are_rejected() {
        let config = AppConfig {
            utc_offset_minutes: 24 * 60,
            ..Default::default()
        };
        assert!(config.local_offset().is_err());
        assert_eq!(config.provider_offset().unwrap().local_minus_utc(), 3 * 3600);
    }

    #[test]
    fn huge_offsets_are_a_configuration_error() {
        let config = AppConfig {
            utc_offset_minutes: i32::MAX,
            provider_utc_offset_minutes: i32::MIN,
            ..Default::default()
        };
        assert!(matches!(config.local_offset(), Err(AppError::ConfigurationError(_))));
        assert!(matches!(config.provider_offset(), Err(AppError::ConfigurationError(_))));
    }
}

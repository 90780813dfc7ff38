//! Process Configuration
//!
//! Read from the environment (after `.env` is loaded).

use std::path::PathBuf;
use std::time::Duration;

use invoice_payments::{Credentials, PayPalEnvironment};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Which payment provider to talk to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderMode {
    PayPal(PayPalEnvironment),
    /// In-process stand-in, no network calls
    Mock,
}

impl ProviderMode {
    pub fn is_production(self) -> bool {
        matches!(self, ProviderMode::PayPal(env) if env.is_production())
    }
}

/// Server configuration
#[derive(Debug)]
pub struct AppConfig {
    pub credentials: Credentials,
    pub mode: ProviderMode,
    /// Overrides the PayPal API host
    pub api_base: Option<String>,
    pub bind_addr: String,
    pub store_path: PathBuf,
    /// ISO 4217 code invoices are issued in
    pub currency: String,
    /// Skip the tunnel and advertise this URL instead
    pub public_url: Option<String>,
    /// Ask the provider for a sample paid event after startup
    pub simulate_event: bool,
    pub dedupe_webhooks: bool,
    pub request_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mode = match var("PAYPAL_MODE") {
            None => ProviderMode::PayPal(PayPalEnvironment::Sandbox),
            Some(v) if v.eq_ignore_ascii_case("mock") => ProviderMode::Mock,
            Some(v) => match PayPalEnvironment::parse(&v) {
                Some(env) => ProviderMode::PayPal(env),
                None => {
                    return Err(ConfigError::Invalid {
                        name: "PAYPAL_MODE",
                        value: v,
                        reason: "expected sandbox, live or mock",
                    });
                }
            },
        };

        let credentials = match mode {
            ProviderMode::Mock => Credentials::new(
                var("PAYPAL_CLIENT_ID").unwrap_or_else(|| "mock-client".into()),
                var("PAYPAL_SECRET").unwrap_or_else(|| "mock-secret".into()),
            ),
            ProviderMode::PayPal(_) => Credentials::new(
                var("PAYPAL_CLIENT_ID").ok_or(ConfigError::Missing("PAYPAL_CLIENT_ID"))?,
                var("PAYPAL_SECRET").ok_or(ConfigError::Missing("PAYPAL_SECRET"))?,
            ),
        };

        let simulate_event = match var("SIMULATE_EVENT") {
            Some(v) => parse_bool("SIMULATE_EVENT", v)?,
            None => true,
        };
        if simulate_event && mode.is_production() {
            tracing::warn!("SIMULATE_EVENT ignored in live mode");
        }

        let dedupe_webhooks = match var("WEBHOOK_DEDUPE") {
            Some(v) => parse_bool("WEBHOOK_DEDUPE", v)?,
            None => true,
        };

        let currency = match var("INVOICE_CURRENCY") {
            Some(v) if v.len() == 3 && v.chars().all(|c| c.is_ascii_alphabetic()) => {
                v.to_ascii_uppercase()
            }
            Some(v) => {
                return Err(ConfigError::Invalid {
                    name: "INVOICE_CURRENCY",
                    value: v,
                    reason: "expected a three-letter currency code",
                });
            }
            None => "USD".into(),
        };

        let request_timeout = match var("REQUEST_TIMEOUT_SECS") {
            Some(v) => match v.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "REQUEST_TIMEOUT_SECS",
                        value: v,
                        reason: "expected a positive number of seconds",
                    });
                }
            },
            None => Duration::from_secs(30),
        };

        Ok(Self {
            credentials,
            mode,
            api_base: var("PAYPAL_API_BASE"),
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            store_path: var("INVOICE_STORE_PATH")
                .unwrap_or_else(|| "invoices.json".into())
                .into(),
            currency,
            public_url: var("PUBLIC_URL"),
            simulate_event: simulate_event && !mode.is_production(),
            dedupe_webhooks,
            request_timeout,
        })
    }
}

fn parse_bool(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value,
            reason: "expected true or false",
        }),
    }
}

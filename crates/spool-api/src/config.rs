use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use spool_core::db::RemoteConfig;
use spool_core::DeliveryMode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: String,
    pub mirror_path: String,
    /// Remote libSQL mirror; takes precedence over `mirror_path`
    pub mirror_remote: Option<RemoteConfig>,
    pub admin_token: String,
    pub delivery_mode: DeliveryMode,
    pub webhook_secret: Option<String>,
    pub webhook_timeout: Duration,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("mirror_path", &self.mirror_path)
            .field("mirror_remote", &self.mirror_remote)
            .field("admin_token", &"[REDACTED]")
            .field("delivery_mode", &self.delivery_mode)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("webhook_timeout", &self.webhook_timeout)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "SPOOL_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = value_or_default(&lookup, "SPOOL_DATABASE_PATH", "spool.db");
        let mirror_path = value_or_default(&lookup, "SPOOL_MIRROR_PATH", "spool-mirror.db");
        let admin_token = required_trimmed(&lookup, "SPOOL_ADMIN_TOKEN")?;

        let mirror_remote = match optional_trimmed(&lookup, "SPOOL_MIRROR_URL") {
            Some(url) => {
                let token = required_trimmed(&lookup, "SPOOL_MIRROR_AUTH_TOKEN")?;
                Some(RemoteConfig::new(url, token))
            }
            None => None,
        };

        let delivery_mode = value_or_default(&lookup, "SPOOL_DELIVERY_MODE", "push")
            .parse::<DeliveryMode>()
            .map_err(|error| ConfigError::Invalid(format!("SPOOL_DELIVERY_MODE: {error}")))?;

        let webhook_secret = optional_trimmed(&lookup, "SPOOL_WEBHOOK_SECRET");
        if delivery_mode == DeliveryMode::Push && webhook_secret.is_none() {
            return Err(ConfigError::MissingVar("SPOOL_WEBHOOK_SECRET"));
        }

        let webhook_timeout_secs = value_or_default(&lookup, "SPOOL_WEBHOOK_TIMEOUT_SECS", "10")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "SPOOL_WEBHOOK_TIMEOUT_SECS must be an integer in [1, 60]".to_string(),
                )
            })?;
        if !(1..=60).contains(&webhook_timeout_secs) {
            return Err(ConfigError::Invalid(
                "SPOOL_WEBHOOK_TIMEOUT_SECS must be in [1, 60]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            database_path,
            mirror_path,
            mirror_remote,
            admin_token,
            delivery_mode,
            webhook_secret,
            webhook_timeout: Duration::from_secs(webhook_timeout_secs),
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

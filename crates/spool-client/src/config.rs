//! Consumer configuration, read from the environment of the host site.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.spool.dev";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5_000);

const MIN_POLL_INTERVAL_MS: u64 = 500;
const MAX_POLL_INTERVAL_MS: u64 = 3_600_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct SpoolConfig {
    pub api_key: String,
    pub site_id: String,
    /// Arms the webhook receiver when set
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub poll_interval: Duration,
}

impl fmt::Debug for SpoolConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SpoolConfig")
            .field("api_key", &"[REDACTED]")
            .field("site_id", &self.site_id)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("base_url", &self.base_url)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl SpoolConfig {
    pub fn new(api_key: impl Into<String>, site_id: impl Into<String>) -> Result<Self, ConfigError> {
        let config = Self {
            api_key: api_key.into().trim().to_string(),
            site_id: site_id.into().trim().to_string(),
            webhook_secret: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        };
        if config.api_key.is_empty() {
            return Err(ConfigError::Invalid("API key must not be empty".into()));
        }
        validate_site_id(&config.site_id)?;
        Ok(config)
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Result<Self, ConfigError> {
        let secret = secret.into().trim().to_string();
        if secret.is_empty() {
            return Err(ConfigError::Invalid("Webhook secret must not be empty".into()));
        }
        self.webhook_secret = Some(secret);
        Ok(self)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ConfigError> {
        self.base_url = parse_base_url(base_url)?;
        Ok(self)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Result<Self, ConfigError> {
        let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self.poll_interval = Duration::from_millis(check_poll_interval(millis)?);
        Ok(self)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = required_trimmed(&lookup, "SPOOL_API_KEY")?;
        let site_id = required_trimmed(&lookup, "SPOOL_SITE_ID")?;
        let mut config = Self::new(api_key, site_id)?;

        config.webhook_secret = optional_trimmed(&lookup, "SPOOL_WEBHOOK_SECRET");

        if let Some(base_url) = optional_trimmed(&lookup, "SPOOL_BASE_URL") {
            config.base_url = parse_base_url(&base_url)?;
        }

        if let Some(raw) = optional_trimmed(&lookup, "SPOOL_POLL_INTERVAL_MS") {
            let millis = raw.parse::<u64>().map_err(|_| {
                ConfigError::Invalid(format!(
                    "SPOOL_POLL_INTERVAL_MS must be an integer in [{MIN_POLL_INTERVAL_MS}, {MAX_POLL_INTERVAL_MS}]"
                ))
            })?;
            config.poll_interval = Duration::from_millis(check_poll_interval(millis)?);
        }

        Ok(config)
    }

    pub const fn webhook_armed(&self) -> bool {
        self.webhook_secret.is_some()
    }

    /// Pull endpoint of the configured site.
    pub fn content_updates_url(&self) -> String {
        format!("{}/sites/{}/content-updates", self.base_url, self.site_id)
    }
}

fn parse_base_url(value: &str) -> Result<String, ConfigError> {
    let value = value.trim().trim_end_matches('/');
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(ConfigError::Invalid(
            "SPOOL_BASE_URL must start with http:// or https://".to_string(),
        ));
    }
    Ok(value.to_string())
}

fn validate_site_id(site_id: &str) -> Result<(), ConfigError> {
    if site_id.is_empty()
        || site_id
            .chars()
            .any(|ch| ch == '/' || ch == '?' || ch == '#' || ch.is_whitespace())
    {
        return Err(ConfigError::Invalid(
            "Site id must be non-empty and contain no `/`, `?`, `#` or whitespace".to_string(),
        ));
    }
    Ok(())
}

fn check_poll_interval(millis: u64) -> Result<u64, ConfigError> {
    if (MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&millis) {
        Ok(millis)
    } else {
        Err(ConfigError::Invalid(format!(
            "Poll interval must be in [{MIN_POLL_INTERVAL_MS}, {MAX_POLL_INTERVAL_MS}] ms"
        )))
    }
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

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(pairs: &[(&str, &str)]) -> Result<SpoolConfig, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        SpoolConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn requires_api_key_and_site_id() {
        let err = parse(&[("SPOOL_SITE_ID", "s1")]).unwrap_err();
        assert!(err.to_string().contains("SPOOL_API_KEY"));

        let err = parse(&[("SPOOL_API_KEY", "spk_1")]).unwrap_err();
        assert!(err.to_string().contains("SPOOL_SITE_ID"));
    }

    #[test]
    fn applies_defaults() {
        let config = parse(&[("SPOOL_API_KEY", "spk_1"), ("SPOOL_SITE_ID", "s1")]).unwrap();

        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert!(!config.webhook_armed());
        assert_eq!(
            config.content_updates_url(),
            "https://api.spool.dev/sites/s1/content-updates"
        );
    }

    #[test]
    fn reads_optional_values() {
        let config = parse(&[
            ("SPOOL_API_KEY", "spk_1"),
            ("SPOOL_SITE_ID", "s1"),
            ("SPOOL_WEBHOOK_SECRET", "whsec"),
            ("SPOOL_BASE_URL", "http://localhost:8080/"),
            ("SPOOL_POLL_INTERVAL_MS", "1500"),
        ])
        .unwrap();

        assert!(config.webhook_armed());
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.poll_interval, Duration::from_millis(1500));
    }

    #[test]
    fn rejects_out_of_range_poll_interval() {
        for value in ["100", "3600001", "soon"] {
            let err = parse(&[
                ("SPOOL_API_KEY", "spk_1"),
                ("SPOOL_SITE_ID", "s1"),
                ("SPOOL_POLL_INTERVAL_MS", value),
            ])
            .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{value}");
        }
    }

    #[test]
    fn rejects_bad_base_url_and_site_id() {
        assert!(parse(&[
            ("SPOOL_API_KEY", "spk_1"),
            ("SPOOL_SITE_ID", "s1"),
            ("SPOOL_BASE_URL", "ftp://example.com"),
        ])
        .is_err());
        assert!(SpoolConfig::new("spk_1", "a/b").is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = SpoolConfig::new("spk_sensitive", "s1")
            .unwrap()
            .with_webhook_secret("whsec_sensitive")
            .unwrap();
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("spk_sensitive"));
        assert!(!debug_output.contains("whsec_sensitive"));
    }

    #[test]
    fn blank_webhook_secret_is_rejected() {
        let config = SpoolConfig::new("spk_1", "s1").unwrap();
        for blank in ["", "   ", "\t\n"] {
            let err = config.clone().with_webhook_secret(blank).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{blank:?}");
        }

        let armed = config.with_webhook_secret("  whsec_1 ").unwrap();
        assert!(armed.webhook_armed());
        assert_eq!(armed.webhook_secret.as_deref(), Some("whsec_1"));
    }
}

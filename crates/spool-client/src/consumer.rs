//! Entry point tying config, the webhook receiver and the poller together.

use std::sync::Arc;

use axum::Router;

use crate::config::{ConfigError, SpoolConfig};
use crate::error::ClientError;
use crate::handler::ChangeHandler;
use crate::poller::{spawn_poller, PollerHandle};
use crate::pull::PullClient;
use crate::webhook::WebhookReceiver;

/// Default mount path for the webhook route.
pub const DEFAULT_WEBHOOK_PATH: &str = "/api/spool";

/// A site's connection to Spool.
///
/// Both delivery paths feed the same handler; a site can mount the webhook
/// route, poll, or do both.
pub struct SpoolConsumer<H> {
    config: SpoolConfig,
    handler: Arc<H>,
}

impl<H> std::fmt::Debug for SpoolConsumer<H> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SpoolConsumer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<H: ChangeHandler> SpoolConsumer<H> {
    pub fn new(config: SpoolConfig, handler: H) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
        }
    }

    /// Build from `SPOOL_*` environment variables.
    pub fn from_env(handler: H) -> Result<Self, ClientError> {
        Ok(Self::new(SpoolConfig::from_env()?, handler))
    }

    pub const fn config(&self) -> &SpoolConfig {
        &self.config
    }

    pub const fn webhook_armed(&self) -> bool {
        self.config.webhook_armed()
    }

    /// Router for the webhook route at `path`.
    ///
    /// Fails when no webhook secret is configured; an unsigned receiver is
    /// never mounted.
    pub fn webhook_router(&self, path: &str) -> Result<Router, ClientError> {
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .filter(|secret| !secret.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::Invalid(
                    "SPOOL_WEBHOOK_SECRET is required to receive webhooks".to_string(),
                )
            })?;
        tracing::info!(path, site = %self.config.site_id, "Mounted Spool webhook receiver");
        Ok(WebhookReceiver::new(secret, Arc::clone(&self.handler)).router(path))
    }

    /// Start polling the pull endpoint at the configured interval.
    pub fn start_polling(&self) -> Result<PollerHandle, ClientError> {
        let client = PullClient::new(&self.config)?;
        tracing::info!(
            url = client.url(),
            interval_ms = u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "Started Spool poller"
        );
        Ok(spawn_poller(
            client,
            Arc::clone(&self.handler),
            self.config.poll_interval,
        ))
    }
}

#[cfg(test)]
mod tests {
    use spool_core::ContentEvent;

    use super::*;
    use crate::handler::HandlerError;

    struct Noop;

    impl ChangeHandler for Noop {
        async fn handle(&self, _event: &ContentEvent) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn config() -> SpoolConfig {
        SpoolConfig::new("spk_1", "site-1").unwrap()
    }

    #[test]
    fn webhook_router_requires_secret() {
        let consumer = SpoolConsumer::new(config(), Noop);
        assert!(!consumer.webhook_armed());

        let err = consumer.webhook_router(DEFAULT_WEBHOOK_PATH).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
        assert!(err.to_string().contains("SPOOL_WEBHOOK_SECRET"));

        let mut blank = config();
        blank.webhook_secret = Some("  ".to_string());
        let consumer = SpoolConsumer::new(blank, Noop);
        assert!(consumer.webhook_router(DEFAULT_WEBHOOK_PATH).is_err());
    }

    #[test]
    fn armed_consumer_mounts_router() {
        let consumer = SpoolConsumer::new(config().with_webhook_secret("whsec").unwrap(), Noop);
        assert!(consumer.webhook_armed());
        assert!(consumer.webhook_router(DEFAULT_WEBHOOK_PATH).is_ok());
    }

    #[tokio::test]
    async fn polling_can_start_and_stop() {
        let config = config()
            .with_base_url("http://127.0.0.1:9")
            .unwrap();
        let consumer = SpoolConsumer::new(config, Noop);

        let poller = consumer.start_polling().unwrap();
        poller.shutdown().await;
    }

    #[test]
    fn debug_hides_credentials() {
        let config = config().with_webhook_secret("whsec_hidden").unwrap();
        let consumer = SpoolConsumer::new(config, Noop);
        let output = format!("{consumer:?}");
        assert!(!output.contains("spk_1"));
        assert!(!output.contains("whsec_hidden"));
    }
}

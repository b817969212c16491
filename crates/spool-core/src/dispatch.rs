//! Webhook push delivery.
//!
//! A delivery is one signed POST of a [`ContentEvent`] to one subscribed
//! endpoint. There is no retry queue: failures are logged and counted, and
//! consumers that also poll will pick the change up on their next sweep.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::mirror::Subscription;
use crate::models::ContentEvent;
use crate::signature::{
    sign_payload, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use crate::util::{compact_text, sanitize_error, unix_millis_now};

/// How change notifications reach consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Signed webhooks after each content write
    Push,
    /// No webhooks; consumers poll the pull endpoint
    Pull,
}

impl DeliveryMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

impl FromStr for DeliveryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "push" => Ok(Self::Push),
            "pull" | "poll" => Ok(Self::Pull),
            other => Err(Error::InvalidInput(format!(
                "Unknown delivery mode `{other}` (expected push or pull)"
            ))),
        }
    }
}

/// One signed delivery, valid for a single HTTP attempt.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_id: String,
    pub event: ContentEvent,
    pub signature: String,
    /// Unix ms at signing time
    pub timestamp: i64,
    pub body: Vec<u8>,
}

impl Delivery {
    /// Serialize and sign an event.
    pub fn prepare(secret: &str, event: &ContentEvent) -> Result<Self> {
        let body = serde_json::to_vec(event)?;
        let signature = sign_payload(secret, &body)?;
        Ok(Self {
            delivery_id: Uuid::now_v7().to_string(),
            event: event.clone(),
            signature,
            timestamp: unix_millis_now(),
            body,
        })
    }
}

/// Per-dispatch counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Signs and POSTs change events to subscribed consumer endpoints.
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    secret: String,
}

impl fmt::Debug for WebhookDispatcher {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("WebhookDispatcher")
            .field("secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl WebhookDispatcher {
    pub fn new(secret: impl Into<String>, timeout: Duration) -> Result<Self> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(Error::Dispatch("Webhook secret must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Dispatch(sanitize_error(&error)))?;
        Ok(Self { client, secret })
    }

    /// Deliver an event to every endpoint, one attempt each.
    ///
    /// Never fails as a whole; per-endpoint outcomes are logged and counted.
    pub async fn dispatch(
        &self,
        site_id: &str,
        subscriptions: &[Subscription],
        event: &ContentEvent,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        if subscriptions.is_empty() {
            tracing::debug!(site = site_id, event = %event.event, "No webhook subscriptions");
            return report;
        }

        for subscription in subscriptions {
            let delivery = match Delivery::prepare(&self.secret, event) {
                Ok(delivery) => delivery,
                Err(error) => {
                    tracing::error!(site = site_id, %error, "Failed to sign webhook delivery");
                    report.failed += 1;
                    continue;
                }
            };

            match self.deliver(&subscription.endpoint_url, &delivery).await {
                Ok(()) => {
                    tracing::info!(
                        site = site_id,
                        delivery = %delivery.delivery_id,
                        event = %event.event,
                        endpoint = %subscription.endpoint_url,
                        "Delivered webhook"
                    );
                    report.delivered += 1;
                }
                Err(message) => {
                    tracing::warn!(
                        site = site_id,
                        delivery = %delivery.delivery_id,
                        event = %event.event,
                        endpoint = %subscription.endpoint_url,
                        error = %message,
                        "Webhook delivery failed"
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }

    async fn deliver(&self, endpoint: &str, delivery: &Delivery) -> std::result::Result<(), String> {
        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, &delivery.signature)
            .header(DELIVERY_HEADER, &delivery.delivery_id)
            .header(EVENT_HEADER, delivery.event.event.as_str())
            .header(TIMESTAMP_HEADER, delivery.timestamp.to_string())
            .body(delivery.body.clone())
            .send()
            .await
            .map_err(|error| sanitize_error(&error))?;

        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(format!("HTTP {status}: {}", compact_text(&body)))
    }
}

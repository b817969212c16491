//! Client for the pull endpoint.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use spool_core::util::{compact_text, sanitize_error};
use spool_core::ContentUpdate;

use crate::config::SpoolConfig;
use crate::error::ClientError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One pull response: the newest published items of the site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUpdates {
    pub items: Vec<ContentUpdate>,
    pub timestamp: i64,
}

/// Anything the poller can fetch updates from.
pub trait UpdateSource: Send + Sync + 'static {
    fn fetch_updates(&self) -> impl Future<Output = Result<ContentUpdates, ClientError>> + Send;
}

#[derive(Clone)]
pub struct PullClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl std::fmt::Debug for PullClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PullClient")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl PullClient {
    pub fn new(config: &SpoolConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| ClientError::Http(sanitize_error(&error)))?;
        Ok(Self {
            client,
            url: config.content_updates_url(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl UpdateSource for PullClient {
    async fn fetch_updates(&self) -> Result<ContentUpdates, ClientError> {
        let response = self
            .client
            .get(&self.url)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|error| ClientError::Http(sanitize_error(&error)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Unauthorized(compact_text(&body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http(format!(
                "HTTP {}: {}",
                status.as_u16(),
                compact_text(&body)
            )));
        }

        response
            .json::<ContentUpdates>()
            .await
            .map_err(|error| ClientError::Decode(sanitize_error(&error)))
    }
}

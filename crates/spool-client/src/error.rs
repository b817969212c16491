use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether trying again later can succeed without operator action.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

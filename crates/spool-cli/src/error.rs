use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] spool_core::Error),
    #[error(transparent)]
    Client(#[from] spool_client::ClientError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Site name cannot be empty")]
    EmptySiteName,
    #[error("Site not found: {0}")]
    SiteNotFound(String),
    #[error("API key is not valid for site {0}")]
    InvalidCredentials(String),
    #[error("No site uses this API key")]
    UnknownApiKey,
    #[error("Input is neither a content item nor a pull row: {0}")]
    UnrecognizedInput(String),
    #[error("{failed} site(s) failed to re-sync into the mirror")]
    ResyncIncomplete { failed: usize },
    #[error("Configuration error: {0}")]
    Config(String),
}

//! Small helpers shared by the mirror, the dispatcher and the client.

use crate::error::{Error, Result};

/// Trim a webhook endpoint and require an `http(s)://` URL with a host.
pub fn normalize_endpoint_url(value: &str) -> Result<String> {
    let value = value.trim();
    let host = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .unwrap_or_default();
    if host.is_empty() || host.starts_with('/') || value.chars().any(char::is_whitespace) {
        return Err(Error::InvalidInput(
            "Webhook endpoint must be an http:// or https:// URL".into(),
        ));
    }
    Ok(value.to_string())
}

/// Response bodies quoted in errors are capped at 180 characters.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Flatten an error into a single log-friendly line.
pub fn sanitize_error(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

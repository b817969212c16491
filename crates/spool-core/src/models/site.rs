//! Site model

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Prefix carried by every generated site API key.
pub const API_KEY_PREFIX: &str = "spk_";

const API_KEY_HEX_LEN: usize = 48;
const MAX_SITE_NAME_LEN: usize = 120;

/// A registered site, as held by the authoritative store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    /// Opaque identifier (UUID v7 for sites created here)
    pub id: String,
    /// Secret API key, globally unique
    pub api_key: String,
    /// Display name
    pub name: String,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last rename/key rotation timestamp (Unix ms)
    pub updated_at: i64,
}

impl fmt::Debug for Site {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Site")
            .field("id", &self.id)
            .field("api_key", &"[REDACTED]")
            .field("name", &self.name)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl Site {
    /// Create a new site with a fresh id and API key.
    pub fn new(name: &str) -> Result<Self> {
        let name = validate_site_name(name)?;
        let now = chrono::Utc::now().timestamp_millis();
        Ok(Self {
            id: Uuid::now_v7().to_string(),
            api_key: generate_api_key(),
            name,
            created_at: now,
            updated_at: now,
        })
    }

    /// Public view of the site that never carries the key.
    #[must_use]
    pub fn summary(&self) -> SiteSummary {
        SiteSummary {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Key-free projection of a site returned by registry lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSummary {
    pub id: String,
    pub name: String,
}

/// Generate a new random site API key (`spk_` + 48 hex characters).
///
/// The hex is one full UUID v4 followed by the first half of another. The
/// fixed version and variant bits leave 182 random bits rather than 192.
#[must_use]
pub fn generate_api_key() -> String {
    let entropy = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let hex: String = entropy.chars().take(API_KEY_HEX_LEN).collect();
    format!("{API_KEY_PREFIX}{hex}")
}

/// Trim and validate a site display name.
pub fn validate_site_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("Site name must not be empty".into()));
    }
    if name.chars().count() > MAX_SITE_NAME_LEN {
        return Err(Error::InvalidInput(format!(
            "Site name must be at most {MAX_SITE_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

//! Content item model and change events

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{Error, Result};

const MAX_SEGMENT_LEN: usize = 128;

static PATH_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("Invalid regex"));

/// Publication status of a content item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Draft,
    Published,
}

impl ContentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
        }
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            other => Err(Error::InvalidInput(format!(
                "Unknown content status `{other}`"
            ))),
        }
    }
}

/// A content item owned by one site and one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub site_id: String,
    pub collection: String,
    /// Unique within `(site_id, collection)`
    pub slug: String,
    pub title: String,
    pub status: ContentStatus,
    /// First publication timestamp (Unix ms)
    pub published_at: Option<i64>,
    /// Last write timestamp (Unix ms)
    pub updated_at: i64,
    /// Arbitrary structured payload
    pub data: Value,
}

impl ContentItem {
    pub const fn is_published(&self) -> bool {
        matches!(self.status, ContentStatus::Published)
    }
}

/// Change notification kinds carried in `X-Spool-Event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentEventKind {
    #[serde(rename = "content.created")]
    Created,
    #[serde(rename = "content.updated")]
    Updated,
    #[serde(rename = "content.published")]
    Published,
    #[serde(rename = "content.deleted")]
    Deleted,
}

impl ContentEventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "content.created",
            Self::Updated => "content.updated",
            Self::Published => "content.published",
            Self::Deleted => "content.deleted",
        }
    }
}

impl fmt::Display for ContentEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentEventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "content.created" => Ok(Self::Created),
            "content.updated" => Ok(Self::Updated),
            "content.published" => Ok(Self::Published),
            "content.deleted" => Ok(Self::Deleted),
            other => Err(Error::InvalidInput(format!("Unknown event `{other}`"))),
        }
    }
}

/// Webhook body: `{event, collection, slug, item_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEvent {
    pub event: ContentEventKind,
    pub collection: String,
    pub slug: String,
    pub item_id: String,
}

impl ContentEvent {
    pub fn for_item(event: ContentEventKind, item: &ContentItem) -> Self {
        Self {
            event,
            collection: item.collection.clone(),
            slug: item.slug.clone(),
            item_id: item.id.clone(),
        }
    }
}

/// Reduced row served by the pull endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUpdate {
    pub item_id: String,
    pub slug: String,
    pub title: String,
    pub collection: String,
    pub updated_at: i64,
}

impl From<&ContentItem> for ContentUpdate {
    fn from(item: &ContentItem) -> Self {
        Self {
            item_id: item.id.clone(),
            slug: item.slug.clone(),
            title: item.title.clone(),
            collection: item.collection.clone(),
            updated_at: item.updated_at,
        }
    }
}

/// Validate a collection name or slug (`[a-z0-9][a-z0-9_-]*`, max 128).
///
/// `kind` names the field in the error message.
pub fn validate_path_segment(kind: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.len() > MAX_SEGMENT_LEN || !PATH_SEGMENT.is_match(value) {
        return Err(Error::InvalidInput(format!(
            "{kind} must be lowercase alphanumeric with `-`/`_` (max {MAX_SEGMENT_LEN})"
        )));
    }
    Ok(value.to_string())
}

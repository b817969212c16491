//! Change fingerprints.
//!
//! A fingerprint is the hex SHA-256 of a canonical JSON rendering of the
//! observable fields of a content item. Canonical means object keys are
//! sorted at every depth and no insignificant whitespace is emitted, so two
//! payloads that differ only in key order hash identically.
//!
//! Fingerprints are compared by byte equality. Any field delta counts as a
//! change, including an `updated_at` bump with no other difference.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::models::{ContentItem, ContentUpdate};

/// Deterministic digest of a content item's observable fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a full content item.
    ///
    /// `data` is canonicalized on its own and embedded as a string before the
    /// outer envelope is canonicalized.
    #[must_use]
    pub fn of_item(item: &ContentItem) -> Self {
        let envelope = json!({
            "title": item.title,
            "slug": item.slug,
            "status": item.status.as_str(),
            "published_at": item.published_at,
            "updated_at": item.updated_at,
            "data": canonical_json(&item.data),
        });
        Self::digest(&canonical_json(&envelope))
    }

    /// Fingerprint a reduced pull-endpoint row.
    #[must_use]
    pub fn of_update(update: &ContentUpdate) -> Self {
        let envelope = json!({
            "item_id": update.item_id,
            "slug": update.slug,
            "title": update.title,
            "collection": update.collection,
            "updated_at": update.updated_at,
        });
        Self::digest(&canonical_json(&envelope))
    }

    fn digest(canonical: &str) -> Self {
        Self(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize a JSON value with object keys sorted at every depth.
///
/// Array order is preserved. Scalars use `serde_json`'s compact rendering.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(left, _), (right, _)| left.cmp(right));
            out.push('{');
            for (index, (key, nested)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(nested, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, nested) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(nested, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

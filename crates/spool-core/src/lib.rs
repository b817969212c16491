//! spool-core - Core library for Spool
//!
//! This crate contains the shared models, the authoritative site/content
//! store, the best-effort sync mirror, change fingerprints, and webhook
//! delivery used by every Spool surface (API server, consumer client, CLI).

pub mod db;
pub mod dispatch;
pub mod error;
pub mod fingerprint;
pub mod mirror;
pub mod models;
pub mod services;
pub mod signature;
pub mod util;

pub use dispatch::{DeliveryMode, DispatchReport, WebhookDispatcher};
pub use error::{Error, Result};
pub use fingerprint::{canonical_json, Fingerprint};
pub use models::{
    ContentEvent, ContentEventKind, ContentItem, ContentStatus, ContentUpdate, Site, SiteSummary,
};
pub use mirror::{LibSqlMirror, Subscription, SyncMirror};
pub use services::{ContentService, SiteRegistry};

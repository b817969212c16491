//! Sync mirror: the secondary, best-effort store.
//!
//! The mirror holds copies of authoritative site rows for low-latency lookups
//! (API key verification, listing) plus live-update rows keyed by site id.
//! It is never the source of truth; the site registry replays the
//! authoritative store into it on demand.

mod store;

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::SiteSummary;

pub use store::LibSqlMirror;

/// Outcome of removing a site from the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RemovedSite {
    /// Whether a mirrored site row existed
    pub found: bool,
    /// Number of dependent live-update rows deleted with it
    pub cascaded: u64,
}

/// Registered webhook endpoint of a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub site_id: String,
    pub endpoint_url: String,
    pub created_at: i64,
}

/// Operations the core needs from a mirror backend: upsert row, delete row,
/// query by index.
pub trait SyncMirror: Send + Sync + 'static {
    /// Idempotent upsert keyed by site id, returning the mirror-side id.
    fn sync_site(
        &self,
        id: &str,
        api_key: &str,
        name: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Delete a site row and every live-update row keyed by its id.
    fn remove_site(&self, id: &str) -> impl Future<Output = Result<RemovedSite>> + Send;

    /// Look the key up, then compare the stored id with the claimed one.
    fn verify_site(
        &self,
        site_id: &str,
        api_key: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Key lookup that never returns the key itself.
    fn site_by_api_key(
        &self,
        api_key: &str,
    ) -> impl Future<Output = Result<Option<SiteSummary>>> + Send;

    fn list_sites(&self) -> impl Future<Output = Result<Vec<SiteSummary>>> + Send;

    /// Register a webhook endpoint for a mirrored site.
    fn add_subscription(
        &self,
        site_id: &str,
        endpoint_url: &str,
    ) -> impl Future<Output = Result<Subscription>> + Send;

    fn subscriptions(
        &self,
        site_id: &str,
    ) -> impl Future<Output = Result<Vec<Subscription>>> + Send;
}

//! Site registry: authoritative writes with best-effort mirror propagation.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;

use super::SharedDatabase;
use crate::db::{LibSqlSiteRepository, SiteRepository};
use crate::error::{Error, Result};
use crate::mirror::{Subscription, SyncMirror};
use crate::models::{generate_api_key, validate_site_name, Site, SiteSummary};

/// Backoff schedule for mirror writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

/// Counters from a full mirror re-sync sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SyncReport {
    pub success: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
enum MirrorWrite {
    Upsert {
        id: String,
        api_key: String,
        name: String,
    },
    Remove {
        id: String,
    },
}

impl MirrorWrite {
    fn upsert(site: &Site) -> Self {
        Self::Upsert {
            id: site.id.clone(),
            api_key: site.api_key.clone(),
            name: site.name.clone(),
        }
    }

    fn site_id(&self) -> &str {
        match self {
            Self::Upsert { id, .. } | Self::Remove { id } => id,
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Upsert { .. } => "upsert",
            Self::Remove { .. } => "remove",
        }
    }

    async fn apply<M: SyncMirror>(&self, mirror: &M) -> Result<()> {
        match self {
            Self::Upsert { id, api_key, name } => {
                mirror.sync_site(id, api_key, name).await?;
            }
            Self::Remove { id } => {
                mirror.remove_site(id).await?;
            }
        }
        Ok(())
    }
}

/// Outstanding mirror writes. Each task waits for its predecessor so writes
/// reach the mirror in commit order.
#[derive(Default)]
struct MirrorQueue {
    tasks: JoinSet<()>,
    tail: Option<oneshot::Receiver<()>>,
}

/// Site registry over the authoritative store and a sync mirror.
///
/// Writes commit to the authoritative store and return; the matching mirror
/// write runs in the background and its failures are only logged. Reads
/// that serve key lookups go to the mirror.
pub struct SiteRegistry<M: SyncMirror> {
    db: SharedDatabase,
    mirror: Arc<M>,
    queue: Arc<Mutex<MirrorQueue>>,
    retry: RetryPolicy,
}

impl<M: SyncMirror> Clone for SiteRegistry<M> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            mirror: Arc::clone(&self.mirror),
            queue: Arc::clone(&self.queue),
            retry: self.retry,
        }
    }
}

impl<M: SyncMirror> SiteRegistry<M> {
    pub fn new(db: SharedDatabase, mirror: Arc<M>) -> Self {
        Self {
            db,
            mirror,
            queue: Arc::new(Mutex::new(MirrorQueue::default())),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Authoritative database handle, for services sharing the connection.
    pub fn database(&self) -> SharedDatabase {
        Arc::clone(&self.db)
    }

    pub fn mirror(&self) -> &Arc<M> {
        &self.mirror
    }

    /// Register a new site with a fresh id and API key.
    pub async fn create_site(&self, name: &str) -> Result<Site> {
        let site = Site::new(name)?;
        let db = self.db.lock().await;
        LibSqlSiteRepository::new(db.connection())
            .insert(&site)
            .await?;

        tracing::info!(site = %site.id, "Created site");
        self.schedule(MirrorWrite::upsert(&site)).await;
        drop(db);
        Ok(site)
    }

    pub async fn rename_site(&self, id: &str, name: &str) -> Result<Site> {
        let name = validate_site_name(name)?;
        let db = self.db.lock().await;
        let site = LibSqlSiteRepository::new(db.connection())
            .rename(id, &name)
            .await?;

        tracing::info!(site = %site.id, "Renamed site");
        self.schedule(MirrorWrite::upsert(&site)).await;
        drop(db);
        Ok(site)
    }

    /// Replace the site's API key. The previous key stops verifying once the
    /// mirror write lands.
    pub async fn rotate_api_key(&self, id: &str) -> Result<Site> {
        let api_key = generate_api_key();
        let db = self.db.lock().await;
        let site = LibSqlSiteRepository::new(db.connection())
            .set_api_key(id, &api_key)
            .await?;

        tracing::info!(site = %site.id, "Rotated site API key");
        self.schedule(MirrorWrite::upsert(&site)).await;
        drop(db);
        Ok(site)
    }

    /// Delete a site. Returns whether an authoritative row existed.
    ///
    /// Mirror cleanup is issued either way so leftovers from an earlier
    /// failed cleanup are removed too.
    pub async fn delete_site(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let deleted = LibSqlSiteRepository::new(db.connection())
            .delete(id)
            .await?;

        if deleted {
            tracing::info!(site = id, "Deleted site");
        } else {
            tracing::debug!(site = id, "Delete requested for unknown site");
        }
        self.schedule(MirrorWrite::Remove { id: id.to_string() })
            .await;
        drop(db);
        Ok(deleted)
    }

    /// Authoritative read, including the key.
    pub async fn get_site(&self, id: &str) -> Result<Option<Site>> {
        let db = self.db.lock().await;
        LibSqlSiteRepository::new(db.connection()).get(id).await
    }

    pub async fn verify_site(&self, site_id: &str, api_key: &str) -> Result<bool> {
        self.mirror.verify_site(site_id, api_key).await
    }

    pub async fn site_by_api_key(&self, api_key: &str) -> Result<Option<SiteSummary>> {
        self.mirror.site_by_api_key(api_key).await
    }

    pub async fn list_sites(&self) -> Result<Vec<SiteSummary>> {
        self.mirror.list_sites().await
    }

    /// Register a webhook endpoint for an existing site.
    ///
    /// The site row is upserted into the mirror inline first, so a pending
    /// background write cannot make the registration fail.
    pub async fn add_subscription(&self, site_id: &str, endpoint_url: &str) -> Result<Subscription> {
        let site = self
            .get_site(site_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("site {site_id}")))?;

        self.mirror
            .sync_site(&site.id, &site.api_key, &site.name)
            .await?;
        let subscription = self.mirror.add_subscription(site_id, endpoint_url).await?;
        tracing::info!(site = site_id, endpoint = %subscription.endpoint_url, "Registered webhook endpoint");
        Ok(subscription)
    }

    pub async fn subscriptions(&self, site_id: &str) -> Result<Vec<Subscription>> {
        self.mirror.subscriptions(site_id).await
    }

    /// Re-upsert every authoritative site into the mirror, one at a time.
    pub async fn resync_all(&self) -> Result<SyncReport> {
        let sites = {
            let db = self.db.lock().await;
            LibSqlSiteRepository::new(db.connection()).list().await?
        };

        let mut report = SyncReport::default();
        for site in &sites {
            match self
                .mirror
                .sync_site(&site.id, &site.api_key, &site.name)
                .await
            {
                Ok(_) => report.success += 1,
                Err(error) => {
                    tracing::warn!(site = %site.id, %error, "Mirror re-sync failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            success = report.success,
            failed = report.failed,
            "Mirror re-sync finished"
        );
        Ok(report)
    }

    /// Wait for every queued mirror write to finish.
    pub async fn flush_mirror(&self) {
        let mut tasks = std::mem::take(&mut self.queue.lock().await.tasks);
        while let Some(result) = tasks.join_next().await {
            if let Err(error) = result {
                tracing::error!(%error, "Mirror write task panicked");
            }
        }
    }

    /// Queue `write` behind every earlier mirror write.
    ///
    /// Callers hold the database guard across this call, so queue order
    /// matches commit order. The queue lock is never held while taking the
    /// database lock.
    async fn schedule(&self, write: MirrorWrite) {
        let mirror = Arc::clone(&self.mirror);
        let retry = self.retry;
        let (done_tx, done_rx) = oneshot::channel();

        let mut queue = self.queue.lock().await;
        while queue.tasks.try_join_next().is_some() {}
        let previous = queue.tail.replace(done_rx);

        queue.tasks.spawn(async move {
            if let Some(previous) = previous {
                // A dropped sender means the predecessor is gone either way
                let _ = previous.await;
            }
            apply_with_retry(mirror.as_ref(), &write, retry).await;
            let _ = done_tx.send(());
        });
    }
}

async fn apply_with_retry<M: SyncMirror>(mirror: &M, write: &MirrorWrite, retry: RetryPolicy) -> bool {
    let attempts = retry.attempts.max(1);
    let mut delay = retry.base_delay;

    for attempt in 1..=attempts {
        match write.apply(mirror).await {
            Ok(()) => {
                tracing::debug!(site = write.site_id(), op = write.label(), attempt, "Mirror write applied");
                return true;
            }
            Err(error) if attempt < attempts => {
                tracing::warn!(
                    site = write.site_id(),
                    op = write.label(),
                    attempt,
                    %error,
                    "Mirror write failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(error) => {
                tracing::error!(
                    site = write.site_id(),
                    op = write.label(),
                    attempts,
                    %error,
                    "Mirror write abandoned"
                );
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::{Database, Schema};
    use crate::mirror::{LibSqlMirror, RemovedSite};
    use crate::services::shared_database;

    /// Mirror whose writes fail while `failures_left` is non-zero.
    struct FlakyMirror {
        inner: LibSqlMirror,
        failures_left: AtomicU32,
        write_attempts: AtomicU32,
    }

    impl FlakyMirror {
        async fn new(failures: u32) -> Self {
            Self {
                inner: LibSqlMirror::open_in_memory().await.unwrap(),
                failures_left: AtomicU32::new(failures),
                write_attempts: AtomicU32::new(0),
            }
        }

        fn set_failures(&self, failures: u32) {
            self.failures_left.store(failures, Ordering::SeqCst);
        }

        fn check(&self) -> Result<()> {
            self.write_attempts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                    0 => None,
                    u32::MAX => Some(u32::MAX),
                    left => Some(left - 1),
                })
                .is_ok();
            if failing {
                Err(Error::Mirror("mirror unavailable".into()))
            } else {
                Ok(())
            }
        }
    }

    impl SyncMirror for FlakyMirror {
        async fn sync_site(&self, id: &str, api_key: &str, name: &str) -> Result<String> {
            self.check()?;
            self.inner.sync_site(id, api_key, name).await
        }

        async fn remove_site(&self, id: &str) -> Result<RemovedSite> {
            self.check()?;
            self.inner.remove_site(id).await
        }

        async fn verify_site(&self, site_id: &str, api_key: &str) -> Result<bool> {
            self.inner.verify_site(site_id, api_key).await
        }

        async fn site_by_api_key(&self, api_key: &str) -> Result<Option<SiteSummary>> {
            self.inner.site_by_api_key(api_key).await
        }

        async fn list_sites(&self) -> Result<Vec<SiteSummary>> {
            self.inner.list_sites().await
        }

        async fn add_subscription(&self, site_id: &str, endpoint_url: &str) -> Result<Subscription> {
            self.inner.add_subscription(site_id, endpoint_url).await
        }

        async fn subscriptions(&self, site_id: &str) -> Result<Vec<Subscription>> {
            self.inner.subscriptions(site_id).await
        }
    }

    const FAST_RETRY: RetryPolicy = RetryPolicy {
        attempts: 3,
        base_delay: Duration::from_millis(1),
    };

    async fn registry(failures: u32) -> SiteRegistry<FlakyMirror> {
        let db = Database::open_in_memory(Schema::Authoritative).await.unwrap();
        let mirror = Arc::new(FlakyMirror::new(failures).await);
        SiteRegistry::new(shared_database(db).unwrap(), mirror).with_retry_policy(FAST_RETRY)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn acme_lifecycle_is_visible_through_the_mirror() {
        let registry = registry(0).await;

        let site = registry.create_site("Acme").await.unwrap();
        registry.flush_mirror().await;
        assert_eq!(
            registry.site_by_api_key(&site.api_key).await.unwrap(),
            Some(SiteSummary {
                id: site.id.clone(),
                name: "Acme".to_string()
            })
        );

        registry.rename_site(&site.id, "Acme Inc").await.unwrap();
        registry.flush_mirror().await;
        assert_eq!(
            registry.site_by_api_key(&site.api_key).await.unwrap(),
            Some(SiteSummary {
                id: site.id.clone(),
                name: "Acme Inc".to_string()
            })
        );

        assert!(registry.delete_site(&site.id).await.unwrap());
        registry.flush_mirror().await;
        assert!(!registry.verify_site(&site.id, &site.api_key).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mirror_failure_does_not_fail_authoritative_writes() {
        let registry = registry(u32::MAX).await;

        let site = registry.create_site("Acme").await.unwrap();
        let renamed = registry.rename_site(&site.id, "Acme Inc").await.unwrap();
        registry.flush_mirror().await;

        assert_eq!(renamed.name, "Acme Inc");
        assert_eq!(
            registry.get_site(&site.id).await.unwrap().map(|s| s.name),
            Some("Acme Inc".to_string())
        );
        assert!(registry.list_sites().await.unwrap().is_empty());
        // Two writes, each tried the full number of attempts
        assert_eq!(registry.mirror().write_attempts.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_mirror_failure_is_retried() {
        let registry = registry(2).await;

        let site = registry.create_site("Acme").await.unwrap();
        registry.flush_mirror().await;

        assert!(registry.verify_site(&site.id, &site.api_key).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resync_reports_counts() {
        let registry = registry(u32::MAX).await;
        registry.create_site("One").await.unwrap();
        registry.create_site("Two").await.unwrap();
        registry.flush_mirror().await;

        let failed = registry.resync_all().await.unwrap();
        assert_eq!(failed, SyncReport { success: 0, failed: 2 });

        registry.mirror().set_failures(0);
        let report = registry.resync_all().await.unwrap();
        assert_eq!(report, SyncReport { success: 2, failed: 0 });
        assert_eq!(registry.list_sites().await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rotated_key_replaces_old_key() {
        let registry = registry(0).await;
        let site = registry.create_site("Acme").await.unwrap();
        let rotated = registry.rotate_api_key(&site.id).await.unwrap();
        registry.flush_mirror().await;

        assert_ne!(rotated.api_key, site.api_key);
        assert!(registry.site_by_api_key(&site.api_key).await.unwrap().is_none());
        assert!(registry.verify_site(&site.id, &rotated.api_key).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mirror_writes_apply_in_commit_order() {
        let registry = registry(0).await;
        let site = registry.create_site("Acme").await.unwrap();
        registry.rename_site(&site.id, "Acme Inc").await.unwrap();
        registry.delete_site(&site.id).await.unwrap();
        registry.flush_mirror().await;

        assert!(registry.list_sites().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_rotations_leave_the_mirror_on_the_latest_key() {
        let registry = registry(0).await;
        let site = registry.create_site("Acme").await.unwrap();

        for _ in 0..10 {
            let mut rotations = JoinSet::new();
            for _ in 0..8 {
                let registry = registry.clone();
                let id = site.id.clone();
                rotations.spawn(async move { registry.rotate_api_key(&id).await.unwrap() });
            }
            while let Some(result) = rotations.join_next().await {
                result.unwrap();
            }
            registry.flush_mirror().await;

            let current = registry.get_site(&site.id).await.unwrap().unwrap();
            assert!(registry.verify_site(&site.id, &current.api_key).await.unwrap());
            assert_eq!(
                registry.site_by_api_key(&current.api_key).await.unwrap(),
                Some(SiteSummary {
                    id: site.id.clone(),
                    name: "Acme".to_string()
                })
            );
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_cascades_subscriptions() {
        let registry = registry(0).await;
        let site = registry.create_site("Acme").await.unwrap();
        registry
            .add_subscription(&site.id, "https://acme.example/hooks/spool")
            .await
            .unwrap();
        assert_eq!(registry.subscriptions(&site.id).await.unwrap().len(), 1);

        registry.delete_site(&site.id).await.unwrap();
        registry.flush_mirror().await;

        assert!(registry.subscriptions(&site.id).await.unwrap().is_empty());
        assert_eq!(
            registry.mirror().inner.dependent_rows(&site.id).await.unwrap(),
            0
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscription_requires_known_site() {
        let registry = registry(0).await;
        let err = registry
            .add_subscription("missing", "https://acme.example/hook")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deleting_unknown_site_returns_false() {
        let registry = registry(0).await;
        assert!(!registry.delete_site("missing").await.unwrap());
        registry.flush_mirror().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_names_are_rejected_before_writing() {
        let registry = registry(0).await;
        let site = registry.create_site("Acme").await.unwrap();

        assert!(registry.create_site("   ").await.is_err());
        assert!(registry.rename_site(&site.id, "").await.is_err());
        assert!(matches!(
            registry.rename_site("missing", "Name").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }
}

//! Content writes and the change events they produce.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use super::SharedDatabase;
use crate::db::{ContentRepository, LibSqlContentRepository, LibSqlSiteRepository, SiteRepository};
use crate::dispatch::{DispatchReport, WebhookDispatcher};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::mirror::SyncMirror;
use crate::models::{
    validate_path_segment, ContentEvent, ContentEventKind, ContentItem, ContentStatus,
    ContentUpdate,
};

/// Maximum number of rows served by the pull endpoint.
pub const PULL_LIMIT: usize = 100;

/// Body of an item write.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ItemInput {
    pub title: String,
    #[serde(default = "empty_object")]
    pub data: Value,
    /// Optional status to apply in the same write
    #[serde(default)]
    pub status: Option<ContentStatus>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Result of a content write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentChange {
    pub item: ContentItem,
    pub fingerprint: Fingerprint,
    /// Event sent to consumers, if the write was visible to them
    pub event: Option<ContentEventKind>,
}

/// Content item writes plus change notification.
///
/// Only consumer-visible changes produce events: writes to drafts that were
/// never published are silent.
pub struct ContentService<M: SyncMirror> {
    db: SharedDatabase,
    mirror: Arc<M>,
    dispatcher: Option<WebhookDispatcher>,
    pending: Arc<Mutex<JoinSet<DispatchReport>>>,
}

impl<M: SyncMirror> Clone for ContentService<M> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            mirror: Arc::clone(&self.mirror),
            dispatcher: self.dispatcher.clone(),
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<M: SyncMirror> ContentService<M> {
    /// `dispatcher` is `None` in pull mode.
    pub fn new(db: SharedDatabase, mirror: Arc<M>, dispatcher: Option<WebhookDispatcher>) -> Self {
        Self {
            db,
            mirror,
            dispatcher,
            pending: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub const fn pushes_webhooks(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Create or overwrite an item, optionally changing its status.
    pub async fn upsert_item(
        &self,
        site_id: &str,
        collection: &str,
        slug: &str,
        input: &ItemInput,
    ) -> Result<ContentChange> {
        validate_path_segment("collection", collection)?;
        validate_path_segment("slug", slug)?;
        let title = input.title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("Title must not be empty".into()));
        }

        let (before, after) = {
            let db = self.db.lock().await;
            Self::require_site(&db, site_id).await?;
            let repo = LibSqlContentRepository::new(db.connection());
            let before = repo.get(site_id, collection, slug).await?;
            let mut after = repo
                .upsert(site_id, collection, slug, title, &input.data)
                .await?;
            if let Some(status) = input.status {
                if status != after.status {
                    after = repo.set_status(site_id, collection, slug, status).await?;
                }
            }
            (before, after)
        };

        let fingerprint = Fingerprint::of_item(&after);
        let event = match before {
            None => after.is_published().then_some(ContentEventKind::Created),
            Some(before) => visible_change(&before, &after, &fingerprint),
        };

        self.finish(site_id, after, fingerprint, event).await
    }

    /// Publish or unpublish an existing item. Setting the current status
    /// again changes nothing.
    pub async fn set_published(
        &self,
        site_id: &str,
        collection: &str,
        slug: &str,
        published: bool,
    ) -> Result<ContentChange> {
        let target = if published {
            ContentStatus::Published
        } else {
            ContentStatus::Draft
        };

        let (before, after) = {
            let db = self.db.lock().await;
            let repo = LibSqlContentRepository::new(db.connection());
            let before = repo
                .get(site_id, collection, slug)
                .await?
                .ok_or_else(|| Error::NotFound(format!("content item {collection}/{slug}")))?;
            if before.status == target {
                (before.clone(), before)
            } else {
                let after = repo.set_status(site_id, collection, slug, target).await?;
                (before, after)
            }
        };

        let fingerprint = Fingerprint::of_item(&after);
        let event = visible_change(&before, &after, &fingerprint);
        self.finish(site_id, after, fingerprint, event).await
    }

    /// Hard delete an item. `None` when it did not exist.
    pub async fn delete_item(
        &self,
        site_id: &str,
        collection: &str,
        slug: &str,
    ) -> Result<Option<ContentChange>> {
        let removed = {
            let db = self.db.lock().await;
            LibSqlContentRepository::new(db.connection())
                .delete(site_id, collection, slug)
                .await?
        };

        let Some(item) = removed else {
            return Ok(None);
        };
        let fingerprint = Fingerprint::of_item(&item);
        let event = item.is_published().then_some(ContentEventKind::Deleted);
        self.finish(site_id, item, fingerprint, event).await.map(Some)
    }

    /// Newest published items of a site, as served to pollers.
    pub async fn recent_updates(&self, site_id: &str) -> Result<Vec<ContentUpdate>> {
        let db = self.db.lock().await;
        LibSqlContentRepository::new(db.connection())
            .recent_published(site_id, PULL_LIMIT)
            .await
    }

    /// Wait for in-flight webhook deliveries and sum their reports.
    pub async fn flush_dispatches(&self) -> DispatchReport {
        let mut tasks = std::mem::take(&mut *self.pending.lock().await);
        let mut total = DispatchReport::default();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(report) => {
                    total.delivered += report.delivered;
                    total.failed += report.failed;
                }
                Err(error) => tracing::error!(%error, "Webhook dispatch task panicked"),
            }
        }
        total
    }

    async fn require_site(db: &crate::db::Database, site_id: &str) -> Result<()> {
        LibSqlSiteRepository::new(db.connection())
            .get(site_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("site {site_id}")))
    }

    async fn finish(
        &self,
        site_id: &str,
        item: ContentItem,
        fingerprint: Fingerprint,
        event: Option<ContentEventKind>,
    ) -> Result<ContentChange> {
        if let Some(kind) = event {
            tracing::info!(
                site = site_id,
                event = %kind,
                collection = %item.collection,
                slug = %item.slug,
                "Content change"
            );
            self.notify(site_id, ContentEvent::for_item(kind, &item)).await;
        }

        Ok(ContentChange {
            item,
            fingerprint,
            event,
        })
    }

    async fn notify(&self, site_id: &str, event: ContentEvent) {
        let Some(dispatcher) = self.dispatcher.clone() else {
            return;
        };

        let subscriptions = match self.mirror.subscriptions(site_id).await {
            Ok(subscriptions) => subscriptions,
            Err(error) => {
                tracing::warn!(site = site_id, %error, "Failed to load webhook subscriptions");
                return;
            }
        };

        let site_id = site_id.to_string();
        let mut pending = self.pending.lock().await;
        while pending.try_join_next().is_some() {}
        pending.spawn(async move { dispatcher.dispatch(&site_id, &subscriptions, &event).await });
    }
}

/// Event for a write to an item that already existed.
fn visible_change(
    before: &ContentItem,
    after: &ContentItem,
    fingerprint: &Fingerprint,
) -> Option<ContentEventKind> {
    match (before.is_published(), after.is_published()) {
        (false, true) => Some(ContentEventKind::Published),
        // Unpublished pages must be rebuilt as well
        (true, false) => Some(ContentEventKind::Updated),
        (true, true) => {
            (Fingerprint::of_item(before) != *fingerprint).then_some(ContentEventKind::Updated)
        }
        (false, false) => None,
    }
}

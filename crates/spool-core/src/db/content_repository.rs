//! Content item repository implementation (authoritative store)

use crate::error::{Error, Result};
use crate::models::{ContentItem, ContentStatus, ContentUpdate};
use libsql::{params, Connection, Row};
use serde_json::Value;
use uuid::Uuid;

const ITEM_COLUMNS: &str =
    "id, site_id, collection, slug, title, status, published_at, updated_at, data";

/// Trait for content item storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ContentRepository {
    /// Get an item by its `(site, collection, slug)` address
    async fn get(&self, site_id: &str, collection: &str, slug: &str)
        -> Result<Option<ContentItem>>;

    /// Create an item as a draft, or overwrite title and data of an existing one.
    ///
    /// Status and `published_at` are preserved on update; `updated_at` is bumped.
    async fn upsert(
        &self,
        site_id: &str,
        collection: &str,
        slug: &str,
        title: &str,
        data: &Value,
    ) -> Result<ContentItem>;

    /// Change the status of an existing item.
    ///
    /// The first publication stamps `published_at`; later transitions keep it.
    async fn set_status(
        &self,
        site_id: &str,
        collection: &str,
        slug: &str,
        status: ContentStatus,
    ) -> Result<ContentItem>;

    /// Hard delete an item, returning the removed row
    async fn delete(&self, site_id: &str, collection: &str, slug: &str)
        -> Result<Option<ContentItem>>;

    /// Most recently updated published items of one site, newest first
    async fn recent_published(&self, site_id: &str, limit: usize) -> Result<Vec<ContentUpdate>>;
}

/// libSQL implementation of `ContentRepository`
pub struct LibSqlContentRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlContentRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_item(row: &Row) -> Result<ContentItem> {
        let status: String = row.get(5)?;
        let data: String = row.get(8)?;
        Ok(ContentItem {
            id: row.get(0)?,
            site_id: row.get(1)?,
            collection: row.get(2)?,
            slug: row.get(3)?,
            title: row.get(4)?,
            status: status.parse()?,
            published_at: row.get::<Option<i64>>(6)?,
            updated_at: row.get(7)?,
            data: serde_json::from_str(&data)?,
        })
    }

    fn not_found(collection: &str, slug: &str) -> Error {
        Error::NotFound(format!("content item {collection}/{slug}"))
    }
}

impl ContentRepository for LibSqlContentRepository<'_> {
    async fn get(
        &self,
        site_id: &str,
        collection: &str,
        slug: &str,
    ) -> Result<Option<ContentItem>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM content_items
                     WHERE site_id = ? AND collection = ? AND slug = ?"
                ),
                [site_id, collection, slug],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_item(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert(
        &self,
        site_id: &str,
        collection: &str,
        slug: &str,
        title: &str,
        data: &Value,
    ) -> Result<ContentItem> {
        let now = chrono::Utc::now().timestamp_millis();
        let data = serde_json::to_string(data)?;

        let rows = self
            .conn
            .execute(
                "UPDATE content_items SET title = ?, data = ?, updated_at = ?
                 WHERE site_id = ? AND collection = ? AND slug = ?",
                params![title, data.as_str(), now, site_id, collection, slug],
            )
            .await?;

        if rows == 0 {
            self.conn
                .execute(
                    "INSERT INTO content_items
                        (id, site_id, collection, slug, title, status, published_at, updated_at, data)
                     VALUES (?, ?, ?, ?, ?, 'draft', NULL, ?, ?)",
                    params![
                        Uuid::now_v7().to_string(),
                        site_id,
                        collection,
                        slug,
                        title,
                        now,
                        data.as_str()
                    ],
                )
                .await?;
        }

        self.get(site_id, collection, slug)
            .await?
            .ok_or_else(|| Self::not_found(collection, slug))
    }

    async fn set_status(
        &self,
        site_id: &str,
        collection: &str,
        slug: &str,
        status: ContentStatus,
    ) -> Result<ContentItem> {
        let now = chrono::Utc::now().timestamp_millis();
        let published_at = matches!(status, ContentStatus::Published).then_some(now);

        let rows = self
            .conn
            .execute(
                "UPDATE content_items
                 SET status = ?, published_at = COALESCE(published_at, ?), updated_at = ?
                 WHERE site_id = ? AND collection = ? AND slug = ?",
                params![status.as_str(), published_at, now, site_id, collection, slug],
            )
            .await?;

        if rows == 0 {
            return Err(Self::not_found(collection, slug));
        }

        self.get(site_id, collection, slug)
            .await?
            .ok_or_else(|| Self::not_found(collection, slug))
    }

    async fn delete(
        &self,
        site_id: &str,
        collection: &str,
        slug: &str,
    ) -> Result<Option<ContentItem>> {
        let Some(existing) = self.get(site_id, collection, slug).await? else {
            return Ok(None);
        };

        self.conn
            .execute("DELETE FROM content_items WHERE id = ?", [existing.id.as_str()])
            .await?;
        Ok(Some(existing))
    }

    async fn recent_published(&self, site_id: &str, limit: usize) -> Result<Vec<ContentUpdate>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn
            .query(
                "SELECT id, slug, title, collection, updated_at
                 FROM content_items
                 WHERE site_id = ? AND status = 'published'
                 ORDER BY updated_at DESC, id DESC
                 LIMIT ?",
                params![site_id, limit],
            )
            .await?;

        let mut updates = Vec::new();
        while let Some(row) = rows.next().await? {
            updates.push(ContentUpdate {
                item_id: row.get(0)?,
                slug: row.get(1)?,
                title: row.get(2)?,
                collection: row.get(3)?,
                updated_at: row.get(4)?,
            });
        }
        Ok(updates)
    }
}

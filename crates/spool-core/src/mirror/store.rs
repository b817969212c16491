//! libSQL-backed sync mirror

use std::path::Path;

use libsql::{params, Connection};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{RemovedSite, Subscription, SyncMirror};
use crate::db::{Database, RemoteConfig, Schema};
use crate::error::{Error, Result};
use crate::models::SiteSummary;
use crate::util::{normalize_endpoint_url, unix_millis_now};

/// Sync mirror stored in its own libSQL database (local file, memory, or remote).
pub struct LibSqlMirror {
    db: Mutex<Database>,
}

impl LibSqlMirror {
    /// Wrap an already opened mirror database.
    pub fn new(db: Database) -> Result<Self> {
        if db.schema() != Schema::Mirror {
            return Err(Error::InvalidInput(
                "Mirror requires a database opened with the mirror schema".into(),
            ));
        }
        Ok(Self { db: Mutex::new(db) })
    }

    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(Database::open(path, Schema::Mirror).await?)
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::new(Database::open_in_memory(Schema::Mirror).await?)
    }

    pub async fn open_remote(config: &RemoteConfig) -> Result<Self> {
        Self::new(Database::open_remote(config, Schema::Mirror).await?)
    }

    /// Count live-update rows keyed by a site id.
    pub async fn dependent_rows(&self, site_id: &str) -> Result<u64> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT COUNT(*) FROM live_subscriptions WHERE site_id = ?",
                [site_id],
            )
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

impl SyncMirror for LibSqlMirror {
    async fn sync_site(&self, id: &str, api_key: &str, name: &str) -> Result<String> {
        let db = self.db.lock().await;
        let conn = db.connection();

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = upsert_site(conn, id, api_key, name).await;
        finish(conn, result).await
    }

    async fn remove_site(&self, id: &str) -> Result<RemovedSite> {
        let db = self.db.lock().await;
        let conn = db.connection();

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = delete_site_cascade(conn, id).await;
        let removed = finish(conn, result).await?;

        if removed.found {
            tracing::info!(
                site = id,
                cascaded = removed.cascaded,
                "Removed mirrored site and live-update rows"
            );
        }
        Ok(removed)
    }

    async fn verify_site(&self, site_id: &str, api_key: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let stored = site_by_key(db.connection(), api_key).await?;
        Ok(stored.is_some_and(|site| site.id == site_id))
    }

    async fn site_by_api_key(&self, api_key: &str) -> Result<Option<SiteSummary>> {
        let db = self.db.lock().await;
        site_by_key(db.connection(), api_key).await
    }

    async fn list_sites(&self) -> Result<Vec<SiteSummary>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT site_id, name FROM mirror_sites ORDER BY name COLLATE NOCASE ASC, site_id ASC",
                (),
            )
            .await?;

        let mut sites = Vec::new();
        while let Some(row) = rows.next().await? {
            sites.push(SiteSummary {
                id: row.get(0)?,
                name: row.get(1)?,
            });
        }
        Ok(sites)
    }

    async fn add_subscription(&self, site_id: &str, endpoint_url: &str) -> Result<Subscription> {
        let endpoint_url = normalize_endpoint_url(endpoint_url)?;

        let db = self.db.lock().await;
        let conn = db.connection();

        if mirror_id_for(conn, site_id).await?.is_none() {
            return Err(Error::NotFound(format!("mirrored site {site_id}")));
        }

        let subscription = Subscription {
            id: Uuid::now_v7().to_string(),
            site_id: site_id.to_string(),
            endpoint_url,
            created_at: unix_millis_now(),
        };
        conn.execute(
            "INSERT OR IGNORE INTO live_subscriptions (id, site_id, endpoint_url, created_at)
             VALUES (?, ?, ?, ?)",
            params![
                subscription.id.as_str(),
                site_id,
                subscription.endpoint_url.as_str(),
                subscription.created_at
            ],
        )
        .await?;

        // Re-read so a duplicate registration returns the original row
        let mut rows = conn
            .query(
                "SELECT id, site_id, endpoint_url, created_at FROM live_subscriptions
                 WHERE site_id = ? AND endpoint_url = ?",
                [site_id, subscription.endpoint_url.as_str()],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| Error::Mirror("Subscription insert was not visible".into()))?;
        Ok(Subscription {
            id: row.get(0)?,
            site_id: row.get(1)?,
            endpoint_url: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    async fn subscriptions(&self, site_id: &str) -> Result<Vec<Subscription>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT id, site_id, endpoint_url, created_at FROM live_subscriptions
                 WHERE site_id = ? ORDER BY created_at ASC, id ASC",
                [site_id],
            )
            .await?;

        let mut subscriptions = Vec::new();
        while let Some(row) = rows.next().await? {
            subscriptions.push(Subscription {
                id: row.get(0)?,
                site_id: row.get(1)?,
                endpoint_url: row.get(2)?,
                created_at: row.get(3)?,
            });
        }
        Ok(subscriptions)
    }
}

async fn upsert_site(conn: &Connection, id: &str, api_key: &str, name: &str) -> Result<String> {
    let now = unix_millis_now();
    let existing = mirror_id_for(conn, id).await?;

    if let Some(mirror_id) = existing {
        conn.execute(
            "UPDATE mirror_sites SET api_key = ?, name = ?, synced_at = ? WHERE mirror_id = ?",
            params![api_key, name, now, mirror_id.as_str()],
        )
        .await?;
        return Ok(mirror_id);
    }

    let mirror_id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO mirror_sites (mirror_id, site_id, api_key, name, synced_at) VALUES (?, ?, ?, ?, ?)",
        params![mirror_id.as_str(), id, api_key, name, now],
    )
    .await?;
    Ok(mirror_id)
}

async fn delete_site_cascade(conn: &Connection, id: &str) -> Result<RemovedSite> {
    if mirror_id_for(conn, id).await?.is_none() {
        return Ok(RemovedSite::default());
    }

    let cascaded = conn
        .execute("DELETE FROM live_subscriptions WHERE site_id = ?", [id])
        .await?;
    conn.execute("DELETE FROM mirror_sites WHERE site_id = ?", [id])
        .await?;

    Ok(RemovedSite {
        found: true,
        cascaded,
    })
}

async fn mirror_id_for(conn: &Connection, site_id: &str) -> Result<Option<String>> {
    let mut rows = conn
        .query("SELECT mirror_id FROM mirror_sites WHERE site_id = ?", [site_id])
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

async fn site_by_key(conn: &Connection, api_key: &str) -> Result<Option<SiteSummary>> {
    let mut rows = conn
        .query(
            "SELECT site_id, name FROM mirror_sites WHERE api_key = ?",
            [api_key],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(SiteSummary {
            id: row.get(0)?,
            name: row.get(1)?,
        })),
        None => Ok(None),
    }
}

async fn finish<T>(conn: &Connection, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            if let Err(error) = conn.execute("COMMIT", ()).await {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(error.into());
            }
            Ok(value)
        }
        Err(error) => {
            conn.execute("ROLLBACK", ()).await.ok();
            Err(error)
        }
    }
}

//! Database migrations

use crate::error::Result;
use libsql::Connection;

use super::Schema;

/// Current schema version of the authoritative store
const AUTHORITATIVE_VERSION: i32 = 1;
/// Current schema version of the mirror store
const MIRROR_VERSION: i32 = 1;

/// Run all pending migrations for the given schema
pub async fn run(conn: &Connection, schema: Schema) -> Result<()> {
    let version = get_version(conn).await?;

    match schema {
        Schema::Authoritative => {
            if version < 1 {
                apply(conn, 1, &AUTHORITATIVE_V1).await?;
            }
        }
        Schema::Mirror => {
            if version < 1 {
                apply(conn, 1, &MIRROR_V1).await?;
            }
        }
    }

    Ok(())
}

/// Latest version for a schema
pub const fn current_version(schema: Schema) -> i32 {
    match schema {
        Schema::Authoritative => AUTHORITATIVE_VERSION,
        Schema::Mirror => MIRROR_VERSION,
    }
}

/// Get the current schema version
pub async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

const AUTHORITATIVE_V1: [&str; 6] = [
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS sites (
        id TEXT PRIMARY KEY,
        api_key TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS content_items (
        id TEXT PRIMARY KEY,
        site_id TEXT NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
        collection TEXT NOT NULL,
        slug TEXT NOT NULL,
        title TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'draft',
        published_at INTEGER,
        updated_at INTEGER NOT NULL,
        data TEXT NOT NULL DEFAULT '{}',
        UNIQUE (site_id, collection, slug)
    )",
    "CREATE INDEX IF NOT EXISTS idx_content_site_updated
        ON content_items(site_id, status, updated_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_content_collection ON content_items(site_id, collection)",
    "INSERT INTO schema_version (version) VALUES (1)",
];

const MIRROR_V1: [&str; 5] = [
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS mirror_sites (
        mirror_id TEXT PRIMARY KEY,
        site_id TEXT NOT NULL UNIQUE,
        api_key TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        synced_at INTEGER NOT NULL
    )",
    // Live-update rows are keyed by site id without a foreign key so the
    // site cascade can count what it removes.
    "CREATE TABLE IF NOT EXISTS live_subscriptions (
        id TEXT PRIMARY KEY,
        site_id TEXT NOT NULL,
        endpoint_url TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE (site_id, endpoint_url)
    )",
    "CREATE INDEX IF NOT EXISTS idx_live_subscriptions_site ON live_subscriptions(site_id)",
    "INSERT INTO schema_version (version) VALUES (1)",
];

/// Apply one migration's statements in a transaction
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

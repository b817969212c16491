//! Database connection management

use crate::error::{Error, Result};
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::fmt;
use std::path::Path;

use super::migrations;

/// Which table set a database carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// Sites and content items (source of truth)
    Authoritative,
    /// Best-effort site copies and live-update rows
    Mirror,
}

/// Connection settings for a network-reachable libSQL database (e.g. Turso)
#[derive(Clone, Default)]
pub struct RemoteConfig {
    /// Remote database URL (e.g., `libsql://your-db.turso.io`)
    pub url: Option<String>,
    /// Authentication token for remote database
    pub auth_token: Option<String>,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl RemoteConfig {
    /// Create a new remote configuration
    pub fn new(url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            auth_token: Some(auth_token.into()),
        }
    }

    /// Check if the remote is fully configured
    pub const fn is_configured(&self) -> bool {
        self.url.is_some() && self.auth_token.is_some()
    }
}

/// Database wrapper for libSQL connections
pub struct Database {
    _db: LibSqlDatabase,
    conn: Connection,
    schema: Schema,
    remote: bool,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>, schema: Schema) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        Self::init(db, schema, false).await
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory(schema: Schema) -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::init(db, schema, false).await
    }

    /// Open a remote database over the network.
    ///
    /// Every statement is a round trip; local pragmas are skipped.
    pub async fn open_remote(config: &RemoteConfig, schema: Schema) -> Result<Self> {
        let url = config
            .url
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("Remote database URL is required".into()))?;
        let token = config
            .auth_token
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("Remote auth token is required".into()))?;

        let db = Builder::new_remote(url.clone(), token.clone())
            .build()
            .await?;
        tracing::info!(url = %url, ?schema, "Connected to remote database");
        Self::init(db, schema, true).await
    }

    async fn init(db: LibSqlDatabase, schema: Schema, remote: bool) -> Result<Self> {
        let conn = db.connect()?;
        let database = Self {
            _db: db,
            conn,
            schema,
            remote,
        };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Configure `SQLite` pragmas for local files
    async fn configure(&self) -> Result<()> {
        if !self.remote {
            // In-memory databases reject WAL; ignore
            self.conn
                .execute("PRAGMA journal_mode = WAL;", ())
                .await
                .ok();
            self.conn
                .execute("PRAGMA synchronous = NORMAL;", ())
                .await
                .ok();
        }
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn, self.schema).await
    }

    /// Table set carried by this database
    pub const fn schema(&self) -> Schema {
        self.schema
    }

    /// Whether this database is reached over the network
    pub const fn is_remote(&self) -> bool {
        self.remote
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory(Schema::Authoritative).await.unwrap();
        assert!(!db.is_remote());
        assert_eq!(db.schema(), Schema::Authoritative);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_file_reopens_existing_schema() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("spool.db");

        {
            let db = Database::open(&path, Schema::Mirror).await.unwrap();
            assert_eq!(db.schema(), Schema::Mirror);
        }

        let reopened = Database::open(&path, Schema::Mirror).await.unwrap();
        let mut rows = reopened
            .connection()
            .query("SELECT COUNT(*) FROM mirror_sites", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 0);
    }

    #[test]
    fn test_remote_config_new() {
        let config = RemoteConfig::new("libsql://mirror.turso.io", "test-token");
        assert!(config.is_configured());
        assert!(!RemoteConfig::default().is_configured());
    }

    #[test]
    fn test_remote_config_debug_redacts_token() {
        let config = RemoteConfig::new("libsql://mirror.turso.io", "secret-token");
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_remote_requires_url() {
        let config = RemoteConfig {
            url: None,
            auth_token: Some("token".to_string()),
        };
        let err = Database::open_remote(&config, Schema::Mirror)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("URL"));
    }
}

//! Site repository implementation (authoritative store)

use crate::error::{Error, Result};
use crate::models::Site;
use libsql::{params, Connection, Row};

/// Trait for authoritative site storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SiteRepository {
    /// Insert a new site
    async fn insert(&self, site: &Site) -> Result<()>;

    /// Get a site by id
    async fn get(&self, id: &str) -> Result<Option<Site>>;

    /// Find a site by its API key
    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Site>>;

    /// Rename a site in place
    async fn rename(&self, id: &str, name: &str) -> Result<Site>;

    /// Replace a site's API key
    async fn set_api_key(&self, id: &str, api_key: &str) -> Result<Site>;

    /// Delete a site; content items cascade. Returns whether a row was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// List every site, oldest first
    async fn list(&self) -> Result<Vec<Site>>;
}

/// libSQL implementation of `SiteRepository`
pub struct LibSqlSiteRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSiteRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_site(row: &Row) -> Result<Site> {
        Ok(Site {
            id: row.get(0)?,
            api_key: row.get(1)?,
            name: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    async fn query_one(&self, sql: &str, value: &str) -> Result<Option<Site>> {
        let mut rows = self.conn.query(sql, [value]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_site(&row)?)),
            None => Ok(None),
        }
    }
}

impl SiteRepository for LibSqlSiteRepository<'_> {
    async fn insert(&self, site: &Site) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sites (id, api_key, name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
                params![
                    site.id.as_str(),
                    site.api_key.as_str(),
                    site.name.as_str(),
                    site.created_at,
                    site.updated_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Site>> {
        self.query_one(
            "SELECT id, api_key, name, created_at, updated_at FROM sites WHERE id = ?",
            id,
        )
        .await
    }

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Site>> {
        self.query_one(
            "SELECT id, api_key, name, created_at, updated_at FROM sites WHERE api_key = ?",
            api_key,
        )
        .await
    }

    async fn rename(&self, id: &str, name: &str) -> Result<Site> {
        let now = chrono::Utc::now().timestamp_millis();
        let rows = self
            .conn
            .execute(
                "UPDATE sites SET name = ?, updated_at = ? WHERE id = ?",
                params![name, now, id],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("site {id}")));
        }

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("site {id}")))
    }

    async fn set_api_key(&self, id: &str, api_key: &str) -> Result<Site> {
        let now = chrono::Utc::now().timestamp_millis();
        let rows = self
            .conn
            .execute(
                "UPDATE sites SET api_key = ?, updated_at = ? WHERE id = ?",
                params![api_key, now, id],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("site {id}")));
        }

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("site {id}")))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sites WHERE id = ?", [id])
            .await?;
        Ok(rows > 0)
    }

    async fn list(&self) -> Result<Vec<Site>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, api_key, name, created_at, updated_at FROM sites ORDER BY created_at ASC, id ASC",
                (),
            )
            .await?;

        let mut sites = Vec::new();
        while let Some(row) = rows.next().await? {
            sites.push(Self::parse_site(&row)?);
        }
        Ok(sites)
    }
}

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use spool_core::db::{Database, RemoteConfig, Schema};
use spool_core::services::{shared_database, SiteRegistry};
use spool_core::{LibSqlMirror, Subscription};

use crate::error::CliError;

pub const DEFAULT_DB_PATH: &str = "spool.db";
pub const DEFAULT_MIRROR_PATH: &str = "spool-mirror.db";

pub type Registry = SiteRegistry<LibSqlMirror>;

/// Storage locations resolved from flags, then environment, then defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub database: PathBuf,
    pub mirror: PathBuf,
}

impl StoragePaths {
    pub fn resolve(db_path: Option<PathBuf>, mirror_path: Option<PathBuf>) -> Self {
        Self::resolve_with(db_path, mirror_path, |name| env::var_os(name).map(PathBuf::from))
    }

    pub fn resolve_with(
        db_path: Option<PathBuf>,
        mirror_path: Option<PathBuf>,
        lookup: impl Fn(&str) -> Option<PathBuf>,
    ) -> Self {
        Self {
            database: db_path
                .or_else(|| lookup("SPOOL_DATABASE_PATH"))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            mirror: mirror_path
                .or_else(|| lookup("SPOOL_MIRROR_PATH"))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MIRROR_PATH)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionItem {
    pub id: String,
    pub site_id: String,
    pub endpoint_url: String,
    pub created_at: i64,
    pub created_at_iso: String,
}

pub async fn open_registry(paths: &StoragePaths) -> Result<Registry, CliError> {
    ensure_parent_dir(&paths.database)?;
    let db = Database::open(&paths.database, Schema::Authoritative).await?;

    let mirror = if let Some(remote) = remote_mirror_from_env()? {
        tracing::info!("Using remote mirror");
        LibSqlMirror::open_remote(&remote).await?
    } else {
        ensure_parent_dir(&paths.mirror)?;
        LibSqlMirror::open(&paths.mirror).await?
    };

    Ok(SiteRegistry::new(shared_database(db)?, Arc::new(mirror)))
}

fn ensure_parent_dir(path: &Path) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn remote_mirror_from_env() -> Result<Option<RemoteConfig>, CliError> {
    remote_mirror_with(|name| env::var(name).ok())
}

pub fn remote_mirror_with(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<RemoteConfig>, CliError> {
    let url = lookup("SPOOL_MIRROR_URL").filter(|value| !value.trim().is_empty());
    let token = lookup("SPOOL_MIRROR_AUTH_TOKEN").filter(|value| !value.trim().is_empty());

    match (url, token) {
        (None, _) => Ok(None),
        (Some(url), Some(token)) => Ok(Some(RemoteConfig::new(url.trim(), token.trim()))),
        (Some(_), None) => Err(CliError::Config(
            "SPOOL_MIRROR_URL is set but SPOOL_MIRROR_AUTH_TOKEN is missing".into(),
        )),
    }
}

/// Join trailing words into a site name.
pub fn resolve_site_name(parts: &[String]) -> Result<String, CliError> {
    let name = parts.join(" ");
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptySiteName);
    }
    Ok(trimmed.to_string())
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |value| value.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

pub fn subscription_to_item(subscription: &Subscription) -> SubscriptionItem {
    SubscriptionItem {
        id: subscription.id.clone(),
        site_id: subscription.site_id.clone(),
        endpoint_url: subscription.endpoint_url.clone(),
        created_at: subscription.created_at,
        created_at_iso: format_timestamp(subscription.created_at),
    }
}

pub fn format_subscription_lines(subscriptions: &[Subscription]) -> Vec<String> {
    subscriptions
        .iter()
        .map(|subscription| {
            format!(
                "{}  {}  ({})",
                short_id(&subscription.id),
                subscription.endpoint_url,
                format_timestamp(subscription.created_at)
            )
        })
        .collect()
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

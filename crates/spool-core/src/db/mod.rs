//! Database layer for Spool

mod connection;
mod content_repository;
mod migrations;
mod site_repository;

pub use connection::{Database, RemoteConfig, Schema};
pub use content_repository::{ContentRepository, LibSqlContentRepository};
pub use site_repository::{LibSqlSiteRepository, SiteRepository};

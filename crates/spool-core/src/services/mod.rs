//! Store-backed services shared by the API server and the CLI.

mod content;
mod registry;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{Database, Schema};
use crate::error::{Error, Result};

pub use content::{ContentChange, ContentService, ItemInput, PULL_LIMIT};
pub use registry::{RetryPolicy, SiteRegistry, SyncReport};

/// Authoritative database handle shared between services.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Wrap an authoritative database for sharing across services.
pub fn shared_database(db: Database) -> Result<SharedDatabase> {
    if db.schema() != Schema::Authoritative {
        return Err(Error::InvalidInput(
            "Services require the authoritative schema".into(),
        ));
    }
    Ok(Arc::new(Mutex::new(db)))
}

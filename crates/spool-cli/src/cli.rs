use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "spool")]
#[command(about = "Manage Spool sites and watch live content updates")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the authoritative database (default: $SPOOL_DATABASE_PATH or spool.db)
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Path to the local mirror (default: $SPOOL_MIRROR_PATH or spool-mirror.db)
    #[arg(long, global = true, value_name = "PATH")]
    pub mirror_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register and manage sites
    Site {
        #[command(subcommand)]
        command: SiteCommands,
    },
    /// Re-upsert every site into the mirror
    Resync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fingerprint a content item or pull row read as JSON
    Fingerprint {
        /// Input file (stdin when omitted)
        #[arg(value_name = "PATH")]
        input: Option<PathBuf>,
        /// Also print the canonical JSON rendering
        #[arg(long)]
        canonical: bool,
    },
    /// Poll a site's pull endpoint and print detected changes
    Watch {
        /// Site id (default: $SPOOL_SITE_ID)
        #[arg(long, value_name = "ID")]
        site_id: Option<String>,
        /// Site API key (default: $SPOOL_API_KEY)
        #[arg(long, value_name = "KEY")]
        api_key: Option<String>,
        /// API base URL (default: $SPOOL_BASE_URL or the hosted API)
        #[arg(long, value_name = "URL")]
        base_url: Option<String>,
        /// Poll interval in milliseconds
        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,
    },
}

#[derive(Subcommand)]
pub enum SiteCommands {
    /// Register a new site and print its API key
    #[command(alias = "create")]
    Add {
        /// Display name
        name: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List sites known to the mirror
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rename a site
    Rename {
        /// Site ID
        id: String,
        /// New display name
        name: Vec<String>,
    },
    /// Issue a new API key, invalidating the old one
    RotateKey {
        /// Site ID
        id: String,
    },
    /// Delete a site and its webhook endpoints
    #[command(alias = "delete")]
    Remove {
        /// Site ID
        id: String,
    },
    /// Check an API key against a site
    Verify {
        /// Site ID
        id: String,
        /// API key to check
        #[arg(long, value_name = "KEY")]
        api_key: String,
    },
    /// Find the site owning an API key
    Lookup {
        /// API key
        api_key: String,
    },
    /// Register a webhook endpoint for a site
    Subscribe {
        /// Site ID
        id: String,
        /// Endpoint URL receiving signed POSTs
        url: String,
    },
    /// List a site's webhook endpoints
    Subscriptions {
        /// Site ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

//! Spool CLI - site administration and live-update tooling
//!
//! Registers sites against the authoritative store, keeps the mirror in
//! step, and watches a site's pull endpoint from the terminal.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::StoragePaths;
use crate::commands::fingerprint::run_fingerprint;
use crate::commands::resync::run_resync;
use crate::commands::site::run_site;
use crate::commands::watch::{run_watch, WatchArgs};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(
            "spool_cli=info"
                .parse()
                .map_err(|error| CliError::Config(format!("{error}")))?,
        )
        .add_directive(
            "spool_core=warn"
                .parse()
                .map_err(|error| CliError::Config(format!("{error}")))?,
        );
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = StoragePaths::resolve(cli.db_path, cli.mirror_path);

    match cli.command {
        Commands::Site { command } => run_site(command, &paths).await?,
        Commands::Resync { json } => run_resync(json, &paths).await?,
        Commands::Fingerprint { input, canonical } => {
            run_fingerprint(input.as_deref(), canonical)?;
        }
        Commands::Watch {
            site_id,
            api_key,
            base_url,
            interval_ms,
        } => {
            run_watch(WatchArgs {
                site_id,
                api_key,
                base_url,
                interval_ms,
            })
            .await?;
        }
    }

    Ok(())
}

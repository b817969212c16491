use crate::commands::common::{open_registry, StoragePaths};
use crate::error::CliError;

pub async fn run_resync(as_json: bool, paths: &StoragePaths) -> Result<(), CliError> {
    let registry = open_registry(paths).await?;
    let report = registry.resync_all().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Re-synced {} site(s), {} failed", report.success, report.failed);
    }

    if report.failed > 0 {
        return Err(CliError::ResyncIncomplete {
            failed: report.failed,
        });
    }
    Ok(())
}

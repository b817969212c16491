use std::collections::HashMap;
use std::time::Duration;

use spool_client::{handler_fn, ContentEvent, HandlerError, SpoolConfig, SpoolConsumer};

use crate::error::CliError;

#[derive(Debug, Default)]
pub struct WatchArgs {
    pub site_id: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub interval_ms: Option<u64>,
}

pub async fn run_watch(args: WatchArgs) -> Result<(), CliError> {
    let config = watch_config(args, |name| std::env::var(name).ok())?;
    println!(
        "Watching {} every {}ms (Ctrl-C to stop)",
        config.content_updates_url(),
        config.poll_interval.as_millis()
    );

    let consumer = SpoolConsumer::new(
        config,
        handler_fn(|event: ContentEvent| async move {
            println!("{}", format_event_line(&event));
            Ok::<(), HandlerError>(())
        }),
    );
    let poller = consumer.start_polling()?;

    tokio::signal::ctrl_c().await?;
    poller.shutdown().await;
    Ok(())
}

/// Flags override `SPOOL_*` environment values.
pub fn watch_config(
    args: WatchArgs,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SpoolConfig, CliError> {
    let mut overrides: HashMap<&str, String> = HashMap::new();
    if let Some(site_id) = args.site_id {
        overrides.insert("SPOOL_SITE_ID", site_id);
    }
    if let Some(api_key) = args.api_key {
        overrides.insert("SPOOL_API_KEY", api_key);
    }
    if let Some(base_url) = args.base_url {
        overrides.insert("SPOOL_BASE_URL", base_url);
    }

    let config = SpoolConfig::from_lookup(|name| {
        overrides.get(name).cloned().or_else(|| lookup(name))
    })
    .map_err(spool_client::ClientError::from)?;

    match args.interval_ms {
        Some(millis) => Ok(config
            .with_poll_interval(Duration::from_millis(millis))
            .map_err(spool_client::ClientError::from)?),
        None => Ok(config),
    }
}

pub fn format_event_line(event: &ContentEvent) -> String {
    format!(
        "{:<18} {}/{}  ({})",
        event.event.as_str(),
        event.collection,
        event.slug,
        event.item_id
    )
}

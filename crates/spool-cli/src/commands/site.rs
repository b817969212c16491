use serde::Serialize;

use crate::cli::SiteCommands;
use crate::commands::common::{
    format_subscription_lines, open_registry, resolve_site_name, subscription_to_item, Registry,
    StoragePaths, SubscriptionItem,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct CreatedSite<'a> {
    id: &'a str,
    name: &'a str,
    api_key: &'a str,
}

pub async fn run_site(command: SiteCommands, paths: &StoragePaths) -> Result<(), CliError> {
    let registry = open_registry(paths).await?;
    let result = dispatch(command, &registry).await;
    // Queued mirror writes must land before the process exits
    registry.flush_mirror().await;
    result
}

async fn dispatch(command: SiteCommands, registry: &Registry) -> Result<(), CliError> {
    match command {
        SiteCommands::Add { name, json } => add(registry, &name, json).await,
        SiteCommands::List { json } => list(registry, json).await,
        SiteCommands::Rename { id, name } => {
            let site = registry
                .rename_site(&id, &resolve_site_name(&name)?)
                .await?;
            println!("{}  {}", site.id, site.name);
            Ok(())
        }
        SiteCommands::RotateKey { id } => {
            let site = registry.rotate_api_key(&id).await?;
            println!("{}", site.api_key);
            Ok(())
        }
        SiteCommands::Remove { id } => {
            if !registry.delete_site(&id).await? {
                return Err(CliError::SiteNotFound(id));
            }
            println!("{id}");
            Ok(())
        }
        SiteCommands::Verify { id, api_key } => {
            if registry.verify_site(&id, api_key.trim()).await? {
                println!("valid");
                Ok(())
            } else {
                Err(CliError::InvalidCredentials(id))
            }
        }
        SiteCommands::Lookup { api_key } => {
            let site = registry
                .site_by_api_key(api_key.trim())
                .await?
                .ok_or(CliError::UnknownApiKey)?;
            println!("{}  {}", site.id, site.name);
            Ok(())
        }
        SiteCommands::Subscribe { id, url } => {
            let subscription = registry.add_subscription(&id, url.trim()).await?;
            println!("{}", subscription.id);
            Ok(())
        }
        SiteCommands::Subscriptions { id, json } => subscriptions(registry, &id, json).await,
    }
}

async fn add(registry: &Registry, name: &[String], as_json: bool) -> Result<(), CliError> {
    let site = registry.create_site(&resolve_site_name(name)?).await?;

    if as_json {
        let created = CreatedSite {
            id: &site.id,
            name: &site.name,
            api_key: &site.api_key,
        };
        println!("{}", serde_json::to_string_pretty(&created)?);
    } else {
        println!("Site:    {}", site.id);
        println!("Name:    {}", site.name);
        println!("API key: {}", site.api_key);
        println!("Store the API key now; it is not shown again.");
    }
    Ok(())
}

async fn list(registry: &Registry, as_json: bool) -> Result<(), CliError> {
    let sites = registry.list_sites().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&sites)?);
        return Ok(());
    }

    if sites.is_empty() {
        println!("No sites registered.");
        return Ok(());
    }

    for site in &sites {
        println!("{}  {}", site.id, site.name);
    }
    Ok(())
}

async fn subscriptions(registry: &Registry, id: &str, as_json: bool) -> Result<(), CliError> {
    if registry.get_site(id).await?.is_none() {
        return Err(CliError::SiteNotFound(id.to_string()));
    }
    let subscriptions = registry.subscriptions(id).await?;

    if as_json {
        let items = subscriptions
            .iter()
            .map(subscription_to_item)
            .collect::<Vec<SubscriptionItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if subscriptions.is_empty() {
        println!("No webhook endpoints registered.");
        return Ok(());
    }

    for line in format_subscription_lines(&subscriptions) {
        println!("{line}");
    }
    Ok(())
}

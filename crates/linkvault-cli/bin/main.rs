mod cli;

use crate::cli::{Command, LogFormat, StorageBackendArg, CLI};
use anyhow::Context;
use clap::Parser;
use linkvault_core::Repository;
use linkvault_storage::{open_repository, PostgresConfig, StorageConfig};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::try_parse()?;
    init_tracing(config.log_format);

    info!(storage_backend = %config.storage, "starting linkvault");

    let repository = open_repository(storage_config(&config)?).await?;
    let output = run(repository.as_ref(), &config.base_url, config.command).await;
    // deletes on the database backend are only flushed on close
    let closed = repository.close().await;

    let output = output?;
    closed.context("failed to close storage")?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn storage_config(config: &CLI) -> anyhow::Result<StorageConfig> {
    match config.storage {
        StorageBackendArg::Memory => Ok(StorageConfig::Memory),
        StorageBackendArg::File => {
            let path = config
                .file_storage_path
                .clone()
                .context("file storage path is required when storage backend is file")?;
            Ok(StorageConfig::File { path })
        }
        StorageBackendArg::Postgres => {
            let dsn = config
                .database_dsn
                .clone()
                .context("database dsn is required when storage backend is postgres")?;
            Ok(StorageConfig::Postgres(PostgresConfig::builder().dsn(dsn).build()))
        }
    }
}

async fn run(
    repository: &dyn Repository,
    base_url: &str,
    command: Command,
) -> anyhow::Result<Value> {
    let output = match command {
        Command::Store { owner, url } => {
            let outcome = repository.store(&owner, &url).await?;
            json!({
                "id": outcome.id(),
                "short_url": outcome.id().to_url(base_url),
                "already_shortened": !outcome.is_created(),
            })
        }
        Command::Restore { id } => {
            let url = repository.restore(&id).await?;
            json!({ "id": id, "original_url": url })
        }
        Command::List { owner } => {
            let mut links: Vec<_> = repository
                .user_storage(&owner)
                .await?
                .into_iter()
                .collect();
            links.sort();
            let links: Vec<Value> = links
                .into_iter()
                .map(|(id, url)| {
                    json!({ "short_url": id.to_url(base_url), "original_url": url })
                })
                .collect();
            Value::Array(links)
        }
        Command::Delete { owner, ids } => {
            let accepted = ids.len();
            repository.unstore(&owner, ids).await?;
            json!({ "accepted": accepted })
        }
        Command::Batch { owner, entries } => {
            let outcome = repository
                .store_batch(&owner, entries.into_iter().collect())
                .await?;
            let short_urls: serde_json::Map<String, Value> = outcome
                .ids
                .iter()
                .map(|(correlation, id)| (correlation.clone(), json!(id.to_url(base_url))))
                .collect();
            json!({
                "short_urls": short_urls,
                "already_shortened": outcome.conflicts,
            })
        }
        Command::Ping => {
            repository.ping().await?;
            json!({ "status": "ok" })
        }
        Command::Stats => serde_json::to_value(repository.stats().await?)?,
    };

    Ok(output)
}

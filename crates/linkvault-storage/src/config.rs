use crate::batcher::BatcherConfig;
use crate::file::FileRepository;
use crate::memory::MemoryRepository;
use crate::postgres::PostgresRepository;
use linkvault_core::{Repository, Result};
use std::path::PathBuf;
use tracing::info;
use typed_builder::TypedBuilder;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connection settings for the PostgreSQL backend.
#[derive(Debug, Clone, TypedBuilder)]
pub struct PostgresConfig {
    #[builder(setter(into))]
    pub dsn: String,
    #[builder(default = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,
    #[builder(default)]
    pub batcher: BatcherConfig,
}

/// Which backend to run, chosen once at startup.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Memory,
    File { path: PathBuf },
    Postgres(PostgresConfig),
}

impl StorageConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            StorageConfig::Memory => "memory",
            StorageConfig::File { .. } => "file",
            StorageConfig::Postgres(_) => "postgres",
        }
    }
}

/// Opens the configured backend behind the common repository contract.
pub async fn open_repository(config: StorageConfig) -> Result<Box<dyn Repository>> {
    info!(backend = config.backend_name(), "opening storage");

    match config {
        StorageConfig::Memory => Ok(Box::new(MemoryRepository::new())),
        StorageConfig::File { path } => Ok(Box::new(FileRepository::open(path).await?)),
        StorageConfig::Postgres(postgres) => {
            let repository = PostgresRepository::connect(
                &postgres.dsn,
                postgres.max_connections,
                postgres.batcher,
            )
            .await?;
            Ok(Box::new(repository))
        }
    }
}

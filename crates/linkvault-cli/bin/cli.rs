use clap::{Parser, Subcommand, ValueEnum};
use linkvault_core::ShortId;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const STORAGE_BACKEND_ENV: &str = "LINKVAULT_STORAGE";
pub const FILE_STORAGE_PATH_ENV: &str = "LINKVAULT_FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "LINKVAULT_DATABASE_DSN";
pub const LOG_FORMAT_ENV: &str = "LINKVAULT_LOG_FORMAT";
pub const BASE_URL_ENV: &str = "LINKVAULT_BASE_URL";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "memory")]
    Memory,
    #[value(name = "file")]
    File,
    #[value(name = "postgres")]
    Postgres,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::Memory => write!(f, "memory"),
            StorageBackendArg::File => write!(f, "file"),
            StorageBackendArg::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "linkvault", about = "Store and resolve shortened links")]
pub struct CLI {
    #[arg(
        long,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::Memory
    )]
    pub storage: StorageBackendArg,

    #[arg(long, env = FILE_STORAGE_PATH_ENV, required_if_eq("storage", "file"))]
    pub file_storage_path: Option<PathBuf>,

    #[arg(long, env = DATABASE_DSN_ENV, required_if_eq("storage", "postgres"))]
    pub database_dsn: Option<String>,

    /// Prefix for printed short urls.
    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shorten a url on behalf of an owner.
    Store { owner: String, url: String },
    /// Resolve a short id to its original url.
    Restore { id: ShortId },
    /// List the links of an owner.
    List { owner: String },
    /// Soft-delete links of an owner.
    Delete {
        owner: String,
        #[arg(required = true)]
        ids: Vec<ShortId>,
    },
    /// Shorten several urls at once, given as `correlation=url`.
    Batch {
        owner: String,
        #[arg(required = true, value_parser = parse_batch_entry)]
        entries: Vec<(String, String)>,
    },
    /// Check that the storage is reachable.
    Ping,
    /// Count stored links and owners.
    Stats,
}

fn parse_batch_entry(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((correlation, url)) if !correlation.is_empty() && !url.is_empty() => {
            Ok((correlation.to_string(), url.to_string()))
        }
        _ => Err(format!("expected `correlation=url`, got `{raw}`")),
    }
}

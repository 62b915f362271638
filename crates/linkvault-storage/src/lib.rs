//! Storage backends for the link repository.
//!
//! Three interchangeable implementations of [`linkvault_core::Repository`]:
//! a volatile in-memory map, an append-only JSON-lines file and PostgreSQL
//! with asynchronous batched soft deletes.

pub mod batcher;
pub mod config;
pub mod file;
pub mod memory;
pub mod postgres;

pub use batcher::{BatcherConfig, DeleteBatcher, DeleteSink};
pub use config::{open_repository, PostgresConfig, StorageConfig};
pub use file::FileRepository;
pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

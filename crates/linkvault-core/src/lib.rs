//! Core types and traits for the linkvault link repository.
//!
//! This crate provides the data model, the error taxonomy, the
//! [`Repository`] contract shared by every storage backend, and the short
//! id generators used to mint new links.

pub mod error;
pub mod generator;
pub mod record;
pub mod repository;
pub mod short_id;

pub use error::{RepositoryError, Result};
pub use generator::{unique_id, ExistenceProbe, IdGenerator, NanoIdGenerator, SeqGenerator};
pub use record::{LinkRecord, PendingDelete, RepositoryStats};
pub use repository::{BatchOutcome, BatchRequest, Repository, StoreOutcome, UserLinks};
pub use short_id::ShortId;

use crate::short_id::ShortId;
use serde::{Deserialize, Serialize};

/// A stored link.
///
/// Records are created by `store`/`store_batch`, mutated only by `unstore`
/// (which sets the tombstone) and never physically removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub id: ShortId,
    /// Opaque correlation token of the caller that created the link.
    pub owner: String,
    pub original_url: String,
    pub deleted: bool,
}

/// A delete request waiting in the batching pipeline.
///
/// Never persisted; lost if the process exits before it is flushed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingDelete {
    pub owner: String,
    pub id: ShortId,
}

/// Simple counts over a repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryStats {
    /// Number of stored links, tombstones included.
    pub links: u64,
    /// Number of distinct owners.
    pub owners: u64,
}

use crate::error::{RepositoryError, Result};
use crate::record::RepositoryStats;
use crate::short_id::ShortId;
use async_trait::async_trait;
use std::collections::HashMap;

/// All links of one owner, keyed by id.
pub type UserLinks = HashMap<ShortId, String>;

/// A batch of urls to store, keyed by caller supplied correlation id.
pub type BatchRequest = HashMap<String, String>;

/// The result of storing a single url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// A new record was written under this id.
    Created(ShortId),
    /// The url was already stored; this is the pre-existing id.
    AlreadyShortened(ShortId),
}

impl StoreOutcome {
    /// Returns the id the url is addressed by, new or pre-existing.
    pub fn id(&self) -> &ShortId {
        match self {
            StoreOutcome::Created(id) | StoreOutcome::AlreadyShortened(id) => id,
        }
    }

    pub fn into_id(self) -> ShortId {
        match self {
            StoreOutcome::Created(id) | StoreOutcome::AlreadyShortened(id) => id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, StoreOutcome::Created(_))
    }

    /// Converts the advisory outcome into the error-value form:
    /// `AlreadyShortened` becomes `Err(RepositoryError::AlreadyShortened(id))`.
    pub fn into_result(self) -> Result<ShortId> {
        match self {
            StoreOutcome::Created(id) => Ok(id),
            StoreOutcome::AlreadyShortened(id) => Err(RepositoryError::AlreadyShortened(id)),
        }
    }
}

/// The result of storing a batch of urls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Correlation id to short id, for every entry of the batch
    /// (pre-existing ids included).
    pub ids: HashMap<String, ShortId>,
    /// Correlation ids whose url had already been shortened.
    pub conflicts: Vec<String>,
}

impl BatchOutcome {
    /// Aggregate `AlreadyShortened` advisory: the batch succeeded, but at
    /// least one entry was not newly created.
    pub fn is_already_shortened(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Adds one entry of the batch.
    pub fn record(&mut self, correlation_id: String, outcome: StoreOutcome) {
        if !outcome.is_created() {
            self.conflicts.push(correlation_id.clone());
        }
        self.ids.insert(correlation_id, outcome.into_id());
    }
}

impl FromIterator<(String, StoreOutcome)> for BatchOutcome {
    fn from_iter<T: IntoIterator<Item = (String, StoreOutcome)>>(iter: T) -> Self {
        let mut outcome = BatchOutcome::default();
        for (correlation_id, stored) in iter {
            outcome.record(correlation_id, stored);
        }
        outcome
    }
}

/// The storage contract every backend satisfies.
///
/// A concrete backend is chosen once at startup. Callers bound each call
/// with their own deadline (e.g. `tokio::time::timeout`); dropping the
/// returned future cancels that call only.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Stores `url` for `owner` and returns its id.
    ///
    /// Backends that deduplicate by content return
    /// [`StoreOutcome::AlreadyShortened`] with the pre-existing id.
    async fn store(&self, owner: &str, url: &str) -> Result<StoreOutcome>;

    /// Resolves an id to its original url, across all owners.
    ///
    /// Fails with `NotFound`, or `Deleted` for tombstoned records.
    async fn restore(&self, id: &ShortId) -> Result<String>;

    /// Marks the given ids of `owner` as deleted. Fire-and-forget: the
    /// outcome of the deletion itself is never reported back.
    async fn unstore(&self, owner: &str, ids: Vec<ShortId>) -> Result<()>;

    /// Returns every link of `owner`; an empty mapping for unknown owners.
    async fn user_storage(&self, owner: &str) -> Result<UserLinks>;

    /// Stores every url of the batch for `owner`.
    async fn store_batch(&self, owner: &str, batch: BatchRequest) -> Result<BatchOutcome>;

    /// Counts stored links and distinct owners.
    async fn stats(&self) -> Result<RepositoryStats>;

    /// Liveness check.
    async fn ping(&self) -> Result<()>;

    /// Releases backend resources, flushing pending deletes first.
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ShortId {
        ShortId::new_unchecked(s)
    }

    #[test]
    fn created_outcome_converts_to_ok() {
        let outcome = StoreOutcome::Created(id("AAAAAAAA"));
        assert!(outcome.is_created());
        assert_eq!(outcome.into_result().unwrap(), id("AAAAAAAA"));
    }

    #[test]
    fn already_shortened_outcome_keeps_existing_id() {
        let outcome = StoreOutcome::AlreadyShortened(id("AAAAAAAA"));
        assert!(!outcome.is_created());
        assert_eq!(outcome.id(), &id("AAAAAAAA"));

        let err = outcome.into_result().unwrap_err();
        assert!(err.is_already_shortened());
        assert_eq!(err, RepositoryError::AlreadyShortened(id("AAAAAAAA")));
    }

    #[test]
    fn batch_outcome_collects_conflicts() {
        let outcome: BatchOutcome = vec![
            ("c1".to_string(), StoreOutcome::Created(id("id1"))),
            ("c2".to_string(), StoreOutcome::AlreadyShortened(id("id2"))),
        ]
        .into_iter()
        .collect();

        assert!(outcome.is_already_shortened());
        assert_eq!(outcome.conflicts, vec!["c2".to_string()]);
        assert_eq!(outcome.ids.len(), 2);
        assert_eq!(outcome.ids["c2"], id("id2"));
    }

    #[test]
    fn batch_outcome_without_conflicts() {
        let mut outcome = BatchOutcome::default();
        outcome.record("c1".to_string(), StoreOutcome::Created(id("id1")));
        assert!(!outcome.is_already_shortened());
    }
}

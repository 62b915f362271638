use async_trait::async_trait;
use linkvault_core::generator::PROBE_ATTEMPTS;
use linkvault_core::{
    unique_id, BatchOutcome, BatchRequest, ExistenceProbe, IdGenerator, NanoIdGenerator,
    Repository, RepositoryError, RepositoryStats, Result, ShortId, StoreOutcome, UserLinks,
};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Links grouped by owner.
#[derive(Debug, Default)]
struct Buckets {
    by_owner: HashMap<String, UserLinks>,
}

impl Buckets {
    fn insert(&mut self, owner: &str, id: ShortId, url: &str) {
        self.by_owner
            .entry(owner.to_owned())
            .or_default()
            .insert(id, url.to_owned());
    }
}

#[async_trait]
impl ExistenceProbe for Buckets {
    // ids are unique across all owners, so every bucket is scanned
    async fn is_taken(&mut self, id: &ShortId) -> Result<bool> {
        Ok(self.by_owner.values().any(|links| links.contains_key(id)))
    }
}

/// Volatile, process-lifetime repository.
///
/// One mutex serializes every operation, reads included. Urls are not
/// deduplicated by content and `unstore` is not supported.
#[derive(Debug)]
pub struct MemoryRepository<G = NanoIdGenerator> {
    buckets: Mutex<Buckets>,
    generator: G,
}

impl MemoryRepository {
    /// Creates an empty repository with the random id generator.
    pub fn new() -> Self {
        Self::with_generator(NanoIdGenerator::new())
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: IdGenerator> MemoryRepository<G> {
    pub fn with_generator(generator: G) -> Self {
        Self {
            buckets: Mutex::new(Buckets::default()),
            generator,
        }
    }
}

#[async_trait]
impl<G: IdGenerator> Repository for MemoryRepository<G> {
    async fn store(&self, owner: &str, url: &str) -> Result<StoreOutcome> {
        trace!(owner = %owner, "storing link in memory");
        let mut buckets = self.buckets.lock().await;

        let id = unique_id(&self.generator, PROBE_ATTEMPTS, &mut *buckets).await?;
        buckets.insert(owner, id.clone(), url);

        Ok(StoreOutcome::Created(id))
    }

    async fn restore(&self, id: &ShortId) -> Result<String> {
        trace!(id = %id, "restoring link from memory");
        let buckets = self.buckets.lock().await;

        buckets
            .by_owner
            .values()
            .find_map(|links| links.get(id))
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))
    }

    async fn unstore(&self, _owner: &str, _ids: Vec<ShortId>) -> Result<()> {
        Err(RepositoryError::NotSupported {
            backend: "memory",
            operation: "unstore",
        })
    }

    async fn user_storage(&self, owner: &str) -> Result<UserLinks> {
        let buckets = self.buckets.lock().await;
        Ok(buckets.by_owner.get(owner).cloned().unwrap_or_default())
    }

    /// Not transactional: entries inserted before a failure stay stored.
    async fn store_batch(&self, owner: &str, batch: BatchRequest) -> Result<BatchOutcome> {
        trace!(owner = %owner, size = batch.len(), "storing batch in memory");
        let mut buckets = self.buckets.lock().await;
        let mut outcome = BatchOutcome::default();

        for (correlation_id, url) in batch {
            let id = unique_id(&self.generator, PROBE_ATTEMPTS, &mut *buckets).await?;
            buckets.insert(owner, id.clone(), &url);
            outcome.record(correlation_id, StoreOutcome::Created(id));
        }

        debug!(owner = %owner, stored = outcome.ids.len(), "stored batch in memory");
        Ok(outcome)
    }

    async fn stats(&self) -> Result<RepositoryStats> {
        let buckets = self.buckets.lock().await;
        Ok(RepositoryStats {
            links: buckets.by_owner.values().map(|links| links.len() as u64).sum(),
            owners: buckets.by_owner.len() as u64,
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub mod nanoid;
pub mod seq;

pub use nanoid::NanoIdGenerator;
pub use seq::SeqGenerator;

use crate::error::{RepositoryError, Result};
use crate::short_id::ShortId;
use async_trait::async_trait;
use tracing::trace;

/// Length of generated ids.
pub const ID_LENGTH: usize = 8;

/// Attempts made by backends that probe for a free id before writing.
pub const PROBE_ATTEMPTS: usize = 10;

/// Trait for generating short ids.
///
/// Implementations are pure generators that don't interact with storage;
/// collisions are detected by the backend, see [`unique_id`].
pub trait IdGenerator: Send + Sync + 'static {
    fn generate(&self) -> ShortId;
}

/// Existence predicate a backend supplies to [`unique_id`].
#[async_trait]
pub trait ExistenceProbe: Send {
    /// Returns `true` if `id` is already used.
    async fn is_taken(&mut self, id: &ShortId) -> Result<bool>;
}

/// Generates ids until `probe` reports one as free, at most `attempts` times.
///
/// Every probe is an await point, so a caller that drops the future (for
/// example on deadline expiry) stops the remaining attempts.
pub async fn unique_id<G, P>(generator: &G, attempts: usize, probe: &mut P) -> Result<ShortId>
where
    G: IdGenerator + ?Sized,
    P: ExistenceProbe + ?Sized,
{
    for attempt in 1..=attempts {
        let id = generator.generate();
        if !probe.is_taken(&id).await? {
            return Ok(id);
        }
        trace!(id = %id, attempt, "generated id is taken");
    }

    Err(RepositoryError::UnableGenerateId { attempts })
}

use crate::short_id::ShortId;
use thiserror::Error;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Errors surfaced by every repository backend.
///
/// Callers map these to response semantics; backend specific detail only
/// travels inside the string payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("link not found: {0}")]
    NotFound(ShortId),
    #[error("link has been deleted: {0}")]
    Deleted(ShortId),
    /// Informational: the url was stored before under the carried id.
    #[error("url is already shortened as {0}")]
    AlreadyShortened(ShortId),
    #[error("unable to generate a unique id in {attempts} attempts")]
    UnableGenerateId { attempts: usize },
    #[error("{operation} is not supported by the {backend} backend")]
    NotSupported {
        backend: &'static str,
        operation: &'static str,
    },
    #[error("invalid short id: {0}")]
    InvalidId(String),
    #[error("storage backend unavailable: {0}")]
    StorageUnavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage i/o failed: {0}")]
    Io(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
}

impl RepositoryError {
    /// Returns `true` for the advisory `AlreadyShortened` outcome, which
    /// callers treat as "succeeded, but not newly created".
    pub fn is_already_shortened(&self) -> bool {
        matches!(self, RepositoryError::AlreadyShortened(_))
    }
}

impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        RepositoryError::Io(err.to_string())
    }
}

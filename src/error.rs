//! Error types for storage and background operations.
//!
//! Every fallible call in the core returns [`StorageResult<T>`]. Errors are
//! `Clone` so a worker can record them per key in an operation result.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum StorageError {
    /// The key (or bucket) vanished since it was listed.
    #[error("not found: {0}")]
    NotFound(String),

    /// Credentials lack permission for the request.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The backend asked us to slow down.
    #[error("throttled: {0}")]
    Throttled(String),

    /// Transport failure, timeout or transient server error.
    #[error("network error: {0}")]
    Network(String),

    /// Disk full, unwritable destination and similar local failures.
    #[error("local I/O error: {0}")]
    LocalIo(String),

    /// A key that cannot be mapped safely onto a local path.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// No session has been established yet.
    #[error("not connected")]
    NotConnected,

    /// Any other error reported by the storage service.
    #[error("storage error: {0}")]
    Service(String),
}

impl StorageError {
    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Network(_) | StorageError::Throttled(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::LocalIo(err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

//! Error taxonomy of the core.
//!
//! Nothing here crosses the `tick` boundary as a panic: failures are logged
//! and swallowed, surfaced to the peer as a CALLERROR, or handed back to the
//! caller as one of these tagged statuses.

use thiserror::Error;

/// Failures reported by the public engine API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A session is already being prepared or is running on this connector.
    #[error("connector busy with another transaction")]
    Busy,

    /// The transaction ring has no evictable slot left.
    #[error("transaction store full")]
    StoreFull,

    /// No such connector id.
    #[error("connector {0} out of range")]
    UnknownConnector(u32),

    /// The filesystem adapter refused a write; the record is not durable.
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Failures of the filesystem adapter.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<StorageError> for CoreError {
    fn from(e: StorageError) -> Self {
        CoreError::Storage(e.to_string())
    }
}

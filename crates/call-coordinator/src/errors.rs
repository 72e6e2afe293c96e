//! Coordinator error types.

use thiserror::Error;

/// Coordinator error type.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Durable storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Room actor is gone (mailbox or reply channel closed).
    #[error("Room closed")]
    RoomClosed,

    /// Persisted state could not be decoded.
    #[error("Corrupt persisted state: {0}")]
    CorruptState(#[from] serde_json::Error),
}

impl From<crate::storage::StorageError> for CoordinatorError {
    fn from(err: crate::storage::StorageError) -> Self {
        CoordinatorError::Storage(err.to_string())
    }
}

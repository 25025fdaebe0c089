//! Error types for the cache service.

use notesync_protocol::{CodecError, EntityKey};
use thiserror::Error;

/// Result type for cache and sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the cache service.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The durable store cannot be used; callers proceed without cache.
    #[error("local store unavailable: {0}")]
    StoreUnavailable(String),

    /// A persisted record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A remote call failed transiently; the item stays queued.
    #[error("sync of {key} failed, will retry: {message}")]
    RetryableSync {
        /// Entity the item mutates.
        key: EntityKey,
        /// Failure description.
        message: String,
    },

    /// The remote store rejected the mutation; it is dropped.
    #[error("sync of {key} rejected: {message}")]
    PermanentSync {
        /// Entity the item mutates.
        key: EntityKey,
        /// Rejection reason.
        message: String,
    },

    /// The item exceeded the retry ceiling and was dropped.
    #[error("sync of {key} abandoned after {attempts} attempts")]
    QueueAbandoned {
        /// Entity the item mutated.
        key: EntityKey,
        /// Failed attempts made.
        attempts: u32,
    },

    /// A save targeted an entity with a pending delete.
    #[error("{key} has a pending delete; use a new id")]
    EntityDeleted {
        /// Entity with the pending delete.
        key: EntityKey,
    },

    /// The entity id is empty.
    #[error("entity id must not be empty")]
    InvalidEntityId,
}

impl SyncError {
    /// Returns true if the failed operation will be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::RetryableSync { .. })
    }
}

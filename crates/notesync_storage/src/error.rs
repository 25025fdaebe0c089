//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The persistence medium is not accessible (missing permissions,
    /// read-only filesystem, locked by another process).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The storage file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A log record could not be encoded or decoded.
    #[error("record encoding error: {0}")]
    Encoding(String),
}

impl StorageError {
    /// Returns true if the medium itself is inaccessible, as opposed to a
    /// single failed operation.
    pub fn is_unavailable(&self) -> bool {
        match self {
            StorageError::Unavailable(_) => true,
            StorageError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound
            ),
            _ => false,
        }
    }
}

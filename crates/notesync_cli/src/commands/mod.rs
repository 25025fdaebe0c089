//! CLI command implementations.

pub mod clear;
pub mod compact;
pub mod dump_queue;
pub mod inspect;

use notesync_engine::LocalStore;
use notesync_storage::{FileBackend, KvBackend, StorageError, LOG_FILE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the maintenance commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The directory holds no cache log.
    #[error("no offline cache found at {0}")]
    NotFound(PathBuf),

    /// The cache could not be opened, usually because the app holds it.
    #[error("cannot open cache: {0}")]
    Open(#[from] StorageError),

    /// A destructive command was run without confirmation.
    #[error("refusing to {0} without --yes")]
    NotConfirmed(&'static str),
}

/// An opened cache directory.
pub struct Cache {
    /// Raw log backend, for size figures and compaction.
    pub backend: Arc<FileBackend>,
    /// Typed view over the same backend.
    pub store: LocalStore,
}

/// Opens an existing cache directory without creating one.
pub fn open_cache(path: &Path) -> Result<Cache, CommandError> {
    if !path.join(LOG_FILE).exists() {
        return Err(CommandError::NotFound(path.to_path_buf()));
    }

    let backend = Arc::new(FileBackend::open(path)?);
    let store = LocalStore::new(Arc::clone(&backend) as Arc<dyn KvBackend>);
    Ok(Cache { backend, store })
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

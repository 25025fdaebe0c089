//! # NoteSync Storage
//!
//! Durable key/value backends for the NoteSync offline cache.
//!
//! Backends are **opaque byte stores** keyed by UTF-8 strings. They know
//! nothing about entities, queue items or record encodings; the layers above
//! own key namespacing and value formats.
//!
//! ## Design Principles
//!
//! - Every write is visible and durable once the call returns
//! - No partial-write state is observable by readers
//! - Backends must be `Send + Sync`; locking is internal
//! - An inaccessible medium surfaces as [`StorageError::Unavailable`]
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and as the degraded fallback
//! - [`FileBackend`] - Append-only log file replayed on open
//!
//! ## Example
//!
//! ```rust
//! use notesync_storage::{InMemoryBackend, KvBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.put("default/note/n1", b"hello").unwrap();
//! assert_eq!(backend.get("default/note/n1").unwrap(), Some(b"hello".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod log;
mod memory;

pub use backend::KvBackend;
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, LogStats, LOCK_FILE, LOG_FILE};
pub use memory::InMemoryBackend;

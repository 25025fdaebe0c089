//! Storage backend trait definition.

use crate::error::StorageResult;

/// A key/value storage backend for the offline cache.
///
/// Backends are **opaque byte stores**. Callers decide how keys are
/// namespaced and how values are encoded.
///
/// # Invariants
///
/// - `put` replaces any previous value for the key atomically
/// - `get` returns exactly the bytes of the last successful `put`
/// - `keys_with_prefix` returns a finite snapshot; iterating it twice
///   yields the same keys if no writes happened in between
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing and memory-only mode
/// - [`super::FileBackend`] - For persistent storage
pub trait KvBackend: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be made durable.
    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes `key`. Returns whether a value was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be made durable.
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// Returns every key starting with `prefix`, in lexicographic order.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be read.
    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Returns the number of live keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be read.
    fn len(&self) -> StorageResult<usize>;

    /// Returns true if no keys are stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be read.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Flushes buffered writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> StorageResult<()>;
}

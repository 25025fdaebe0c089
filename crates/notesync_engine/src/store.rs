//! Durable local store for cached entities and queue records.
//!
//! Keys are namespaced as:
//!
//! ```text
//! <scope>/<entity type>/<id>   cached entity
//! queue/<queue id>             pending queue item
//! ```
//!
//! where `scope` is the signed-in identity id, or `anonymous`.
//!
//! Any backend failure switches the store to an in-memory fallback so the
//! application keeps working without a durable cache. Entries that can still
//! be read are carried over.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use notesync_protocol::{CachedEntity, EntityType, Origin, SyncQueueItem};
use notesync_storage::{InMemoryBackend, KvBackend, StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key prefix of queue records.
pub const QUEUE_PREFIX: &str = "queue/";

/// Entity and queue persistence over a [`KvBackend`].
pub struct LocalStore {
    backend: RwLock<Arc<dyn KvBackend>>,
    degraded: AtomicBool,
}

impl LocalStore {
    /// Creates a store over `backend`.
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend: RwLock::new(backend),
            degraded: AtomicBool::new(false),
        }
    }

    /// Creates a memory-only store for a medium that could not be opened.
    pub fn unavailable(reason: &StorageError) -> Self {
        warn!(error = %reason, "local store unavailable; continuing with memory-only cache");
        Self {
            backend: RwLock::new(Arc::new(InMemoryBackend::new())),
            degraded: AtomicBool::new(true),
        }
    }

    /// Returns true if the store fell back to memory.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Writes a cached entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity cannot be encoded.
    pub fn put_entity(&self, scope: &str, entity: &CachedEntity) -> SyncResult<()> {
        let key = entity_key(scope, entity.entity_type, &entity.id);
        let bytes = entity.encode()?;
        self.run(|backend| backend.put(&key, &bytes))
    }

    /// Reads a cached entity. Undecodable records read as missing.
    ///
    /// # Errors
    ///
    /// Returns an error only if even the memory fallback fails.
    pub fn get_entity(
        &self,
        scope: &str,
        entity_type: EntityType,
        id: &str,
    ) -> SyncResult<Option<CachedEntity>> {
        let key = entity_key(scope, entity_type, id);
        let bytes = self.run(|backend| backend.get(&key))?;
        Ok(bytes.and_then(|bytes| decode_entity(&key, &bytes)))
    }

    /// Removes a cached entity. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Returns an error only if even the memory fallback fails.
    pub fn remove_entity(&self, scope: &str, entity_type: EntityType, id: &str) -> SyncResult<bool> {
        let key = entity_key(scope, entity_type, id);
        self.run(|backend| backend.remove(&key))
    }

    /// Lists the cached entities of one type in key order.
    ///
    /// # Errors
    ///
    /// Returns an error only if even the memory fallback fails.
    pub fn list_entities(&self, scope: &str, entity_type: EntityType) -> SyncResult<Vec<CachedEntity>> {
        let prefix = format!("{scope}/{entity_type}/");
        self.run(|backend| {
            let mut entities = Vec::new();
            for key in backend.keys_with_prefix(&prefix)? {
                if let Some(bytes) = backend.get(&key)? {
                    entities.extend(decode_entity(&key, &bytes));
                }
            }
            Ok(entities)
        })
    }

    /// Counts the cached entities of a scope.
    ///
    /// # Errors
    ///
    /// Returns an error only if even the memory fallback fails.
    pub fn count_entities(&self, scope: &str) -> SyncResult<usize> {
        let prefix = format!("{scope}/");
        self.run(|backend| Ok(backend.keys_with_prefix(&prefix)?.len()))
    }

    /// Counts cached entities of every scope by type.
    ///
    /// # Errors
    ///
    /// Returns an error only if even the memory fallback fails.
    pub fn entity_counts(&self) -> SyncResult<BTreeMap<EntityType, usize>> {
        let entities = self.all_entities()?;
        let mut counts = BTreeMap::new();
        for (_, entity) in entities {
            *counts.entry(entity.entity_type).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Removes confirmed entries last updated before `cutoff`. Local-origin
    /// entries are kept until the remote store confirms them.
    ///
    /// # Errors
    ///
    /// Returns an error only if even the memory fallback fails.
    pub fn prune_confirmed(&self, cutoff: DateTime<Utc>) -> SyncResult<usize> {
        let stale: Vec<String> = self
            .all_entities()?
            .into_iter()
            .filter(|(_, entity)| entity.origin == Origin::Server && entity.updated_at < cutoff)
            .map(|(key, _)| key)
            .collect();

        let removed = self.run(|backend| {
            let mut removed = 0;
            for key in &stale {
                if backend.remove(key)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })?;

        if removed > 0 {
            debug!(removed, %cutoff, "pruned confirmed cache entries");
        }
        Ok(removed)
    }

    /// Writes a queue item.
    ///
    /// # Errors
    ///
    /// Returns an error if the item cannot be encoded.
    pub fn put_queue_item(&self, item: &SyncQueueItem) -> SyncResult<()> {
        let key = queue_key(&item.queue_id);
        let bytes = item.encode()?;
        self.run(|backend| backend.put(&key, &bytes))
    }

    /// Removes a queue item.
    ///
    /// # Errors
    ///
    /// Returns an error only if even the memory fallback fails.
    pub fn remove_queue_item(&self, queue_id: &str) -> SyncResult<bool> {
        let key = queue_key(queue_id);
        self.run(|backend| backend.remove(&key))
    }

    /// Loads every persisted queue item. Undecodable records are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only if even the memory fallback fails.
    pub fn load_queue_items(&self) -> SyncResult<Vec<SyncQueueItem>> {
        self.run(|backend| {
            let mut items = Vec::new();
            for key in backend.keys_with_prefix(QUEUE_PREFIX)? {
                let Some(bytes) = backend.get(&key)? else {
                    continue;
                };
                match SyncQueueItem::decode(&bytes) {
                    Ok(item) => items.push(item),
                    Err(e) => warn!(%key, error = %e, "skipping unreadable queue record"),
                }
            }
            Ok(items)
        })
    }

    /// Removes every cached entity and queue record.
    ///
    /// # Errors
    ///
    /// Returns an error only if even the memory fallback fails.
    pub fn clear(&self) -> SyncResult<usize> {
        self.run(|backend| {
            let keys = backend.keys_with_prefix("")?;
            for key in &keys {
                backend.remove(key)?;
            }
            backend.flush()?;
            Ok(keys.len())
        })
    }

    /// Flushes the backend.
    ///
    /// # Errors
    ///
    /// Returns an error only if even the memory fallback fails.
    pub fn flush(&self) -> SyncResult<()> {
        self.run(|backend| backend.flush())
    }

    fn all_entities(&self) -> SyncResult<Vec<(String, CachedEntity)>> {
        self.run(|backend| {
            let mut entities = Vec::new();
            for key in backend.keys_with_prefix("")? {
                if key.starts_with(QUEUE_PREFIX) {
                    continue;
                }
                if let Some(bytes) = backend.get(&key)? {
                    if let Some(entity) = decode_entity(&key, &bytes) {
                        entities.push((key, entity));
                    }
                }
            }
            Ok(entities)
        })
    }

    /// Runs `op` against the backend, degrading to memory on failure and
    /// retrying once there.
    fn run<T>(&self, op: impl Fn(&dyn KvBackend) -> StorageResult<T>) -> SyncResult<T> {
        let backend = Arc::clone(&self.backend.read());
        match op(backend.as_ref()) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.degrade(backend.as_ref(), &e);
                let fallback = Arc::clone(&self.backend.read());
                op(fallback.as_ref()).map_err(|e| SyncError::StoreUnavailable(e.to_string()))
            }
        }
    }

    fn degrade(&self, failed: &dyn KvBackend, cause: &StorageError) {
        if self.degraded.swap(true, Ordering::SeqCst) {
            return;
        }

        let salvaged: Vec<(String, Vec<u8>)> = failed
            .keys_with_prefix("")
            .unwrap_or_default()
            .into_iter()
            .filter_map(|key| match failed.get(&key) {
                Ok(Some(value)) => Some((key, value)),
                _ => None,
            })
            .collect();

        warn!(
            error = %cause,
            salvaged = salvaged.len(),
            "local store failed; continuing with memory-only cache"
        );
        *self.backend.write() = Arc::new(InMemoryBackend::with_entries(salvaged));
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}

fn entity_key(scope: &str, entity_type: EntityType, id: &str) -> String {
    format!("{scope}/{entity_type}/{id}")
}

fn queue_key(queue_id: &str) -> String {
    format!("{QUEUE_PREFIX}{queue_id}")
}

fn decode_entity(key: &str, bytes: &[u8]) -> Option<CachedEntity> {
    match CachedEntity::decode(bytes) {
        Ok(entity) => Some(entity),
        Err(e) => {
            warn!(%key, error = %e, "skipping unreadable cache record");
            None
        }
    }
}

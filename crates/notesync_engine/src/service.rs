//! The cache facade used by the application.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::executor::SyncExecutor;
use crate::ports::{
    Anonymous, Clock, IdentityProvider, LogNotifier, Notifier, SystemClock, ANONYMOUS_SCOPE,
};
use crate::queue::SyncQueue;
use crate::remote::RemoteStore;
use crate::state::{FlushOutcome, SyncEvent, SyncOutcome, SyncStatus};
use crate::store::LocalStore;
use chrono::{DateTime, Utc};
use notesync_protocol::{
    CachedEntity, EntityKey, EntityType, Operation, Origin, Payload, SyncQueueItem,
    UPDATED_AT_FIELD,
};
use notesync_storage::{FileBackend, InMemoryBackend, KvBackend};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Marks a drain pass as running for as long as it lives.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum BackendChoice {
    Memory,
    Backend(Arc<dyn KvBackend>),
    Directory(PathBuf),
}

/// Builder for [`CacheService`].
pub struct CacheServiceBuilder<R: RemoteStore> {
    remote: Arc<R>,
    config: SyncConfig,
    backend: BackendChoice,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    online: bool,
}

impl<R: RemoteStore> CacheServiceBuilder<R> {
    /// Sets the configuration.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Persists into the given backend.
    pub fn with_backend(mut self, backend: Arc<dyn KvBackend>) -> Self {
        self.backend = BackendChoice::Backend(backend);
        self
    }

    /// Persists into a cache directory. If it cannot be opened the service
    /// starts memory-only.
    pub fn with_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backend = BackendChoice::Directory(dir.into());
        self
    }

    /// Sets the identity provider used to scope cached entries.
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    /// Sets the user notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Sets the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the initial connectivity state (default online).
    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Opens the store, restores the queue and builds the service.
    ///
    /// # Errors
    ///
    /// Returns an error only if the queue cannot be restored even from the
    /// memory fallback.
    pub fn build(self) -> SyncResult<CacheService<R>> {
        let store = Arc::new(match self.backend {
            BackendChoice::Memory => LocalStore::new(Arc::new(InMemoryBackend::new())),
            BackendChoice::Backend(backend) => LocalStore::new(backend),
            BackendChoice::Directory(dir) => match FileBackend::open(&dir) {
                Ok(backend) => LocalStore::new(Arc::new(backend)),
                Err(e) => LocalStore::unavailable(&e),
            },
        });
        let queue = Arc::new(SyncQueue::load(Arc::clone(&store))?);
        let (events, _) = broadcast::channel(self.config.event_capacity);

        let executor = SyncExecutor::new(
            self.remote,
            Arc::clone(&store),
            Arc::clone(&queue),
            self.config.clone(),
            Arc::clone(&self.clock),
            self.notifier,
            events.clone(),
        );

        Ok(CacheService {
            config: self.config,
            store,
            queue,
            executor,
            connectivity: ConnectivityMonitor::new(self.online),
            identity: self.identity,
            clock: self.clock,
            events,
            draining: AtomicBool::new(false),
            last_sync: RwLock::new(None),
        })
    }
}

/// Offline cache and sync facade.
///
/// Writes are committed locally first and queued for the remote store;
/// reads always reflect preceding local writes.
///
/// # Example
///
/// ```rust,no_run
/// use notesync_engine::{CacheService, MockRemoteStore};
/// use notesync_protocol::{EntityType, Payload};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let service = CacheService::builder(Arc::new(MockRemoteStore::new()))
///     .with_directory("offline-cache")
///     .build()?;
///
/// let mut note = Payload::new();
/// note.insert("title".into(), "Groceries".into());
/// service.save(EntityType::Note, "n1", note).await?;
///
/// let notes = service.load_all(EntityType::Note)?;
/// assert_eq!(notes.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct CacheService<R: RemoteStore> {
    config: SyncConfig,
    store: Arc<LocalStore>,
    queue: Arc<SyncQueue>,
    executor: SyncExecutor<R>,
    connectivity: ConnectivityMonitor,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<SyncEvent>,
    draining: AtomicBool,
    last_sync: RwLock<Option<DateTime<Utc>>>,
}

impl<R: RemoteStore> CacheService<R> {
    /// Starts building a service that syncs to `remote`.
    pub fn builder(remote: Arc<R>) -> CacheServiceBuilder<R> {
        CacheServiceBuilder {
            remote,
            config: SyncConfig::default(),
            backend: BackendChoice::Memory,
            identity: Arc::new(Anonymous),
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
            online: true,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Saves an entity locally and queues it for the remote store.
    ///
    /// The payload is stamped with the entity id and with `updatedAt` set to
    /// the save time, replacing any caller-supplied value.
    ///
    /// When online, the mutation is also forwarded right away; a failure
    /// there leaves it queued and is not reported to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::EntityDeleted`] if a delete for the entity is
    /// still pending, and [`SyncError::InvalidEntityId`] for an empty id.
    pub async fn save(
        &self,
        entity_type: EntityType,
        id: &str,
        mut payload: Payload,
    ) -> SyncResult<CachedEntity> {
        if id.is_empty() {
            return Err(SyncError::InvalidEntityId);
        }

        let key = EntityKey::new(entity_type, id);
        let pending = self.queue.get(&key);
        if pending
            .as_ref()
            .is_some_and(|item| item.operation == Operation::Delete)
        {
            return Err(SyncError::EntityDeleted { key });
        }

        let owner = self.owner();
        let scope = owner.as_deref().unwrap_or(ANONYMOUS_SCOPE);
        let now = self.clock.now();
        payload
            .entry("id")
            .or_insert_with(|| Value::String(id.to_string()));
        payload.insert(UPDATED_AT_FIELD.to_string(), Value::String(now.to_rfc3339()));

        let operation = if pending.is_some() {
            Operation::Update
        } else {
            match self.store.get_entity(scope, entity_type, id)? {
                Some(existing) if existing.origin == Origin::Server => Operation::Update,
                _ => Operation::Create,
            }
        };

        let entity = CachedEntity::local(entity_type, id, payload.clone(), now);
        self.store.put_entity(scope, &entity)?;
        let item = self
            .queue
            .enqueue(entity_type, id, operation, payload, owner.clone(), now)?;

        if self.is_online() {
            self.forward(&item).await;
        }
        Ok(entity)
    }

    /// Deletes an entity locally and queues the remote delete.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidEntityId`] for an empty id.
    pub async fn delete(&self, entity_type: EntityType, id: &str) -> SyncResult<()> {
        if id.is_empty() {
            return Err(SyncError::InvalidEntityId);
        }

        let owner = self.owner();
        let scope = owner.as_deref().unwrap_or(ANONYMOUS_SCOPE);
        let now = self.clock.now();

        self.store.remove_entity(scope, entity_type, id)?;
        let item = self.queue.enqueue(
            entity_type,
            id,
            Operation::Delete,
            Payload::new(),
            owner.clone(),
            now,
        )?;

        if self.is_online() {
            self.forward(&item).await;
        }
        Ok(())
    }

    /// Returns one entity as the application currently sees it.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be read at all.
    pub fn get(&self, entity_type: EntityType, id: &str) -> SyncResult<Option<CachedEntity>> {
        let key = EntityKey::new(entity_type, id);
        if self
            .queue
            .get(&key)
            .is_some_and(|item| item.operation == Operation::Delete)
        {
            return Ok(None);
        }

        let owner = self.owner();
        let scope = owner.as_deref().unwrap_or(ANONYMOUS_SCOPE);
        self.store.get_entity(scope, entity_type, id)
    }

    /// Returns every entity of a type, newest first.
    ///
    /// Pending mutations take precedence over cached copies and pending
    /// deletes hide entries.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be read at all.
    pub fn load_all(&self, entity_type: EntityType) -> SyncResult<Vec<CachedEntity>> {
        let owner = self.owner();
        let scope = owner.as_deref().unwrap_or(ANONYMOUS_SCOPE);

        let mut by_id: BTreeMap<String, CachedEntity> = self
            .store
            .list_entities(scope, entity_type)?
            .into_iter()
            .map(|entity| (entity.id.clone(), entity))
            .collect();

        for item in self.queue.dequeue_all() {
            if item.entity_type != entity_type || item.owner != owner {
                continue;
            }
            match item.operation {
                Operation::Delete => {
                    by_id.remove(&item.entity_id);
                }
                Operation::Create | Operation::Update => {
                    let entity = CachedEntity::local(
                        entity_type,
                        item.entity_id.clone(),
                        item.payload,
                        item.updated_at,
                    );
                    by_id.insert(item.entity_id, entity);
                }
            }
        }

        let mut entities: Vec<CachedEntity> = by_id.into_values().collect();
        entities.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(entities)
    }

    /// Returns the current status.
    pub fn sync_status(&self) -> SyncStatus {
        let owner = self.owner();
        let scope = owner.as_deref().unwrap_or(ANONYMOUS_SCOPE);

        SyncStatus {
            is_online: self.is_online(),
            queue_length: self.queue.size(),
            cache_size: self.store.count_entities(scope).unwrap_or(0),
            last_sync_time: *self.last_sync.read(),
            degraded: self.store.is_degraded(),
        }
    }

    /// Runs a drain pass now.
    pub async fn flush_now(&self) -> FlushOutcome {
        if !self.is_online() {
            return FlushOutcome::Offline;
        }
        let Some(_guard) = DrainGuard::try_acquire(&self.draining) else {
            debug!("drain pass already running");
            return FlushOutcome::AlreadyRunning;
        };

        let report = self.executor.drain().await;
        let finished = self.clock.now();
        *self.last_sync.write() = Some(finished);
        self.prune(finished);

        info!(%report, "drain pass finished");
        let _ = self.events.send(SyncEvent::DrainCompleted(report));
        FlushOutcome::Completed(report)
    }

    /// Applies one queued item remotely, as a drain pass would.
    pub async fn sync_item(&self, item: &SyncQueueItem) -> SyncOutcome {
        self.executor.sync_one(item).await
    }

    /// Subscribes to sync events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Records a connectivity notification. Returns true if the service
    /// just came online.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.connectivity.set_online(online);
        if changed {
            let _ = self.events.send(SyncEvent::ConnectivityChanged { online });
        }
        changed && online
    }

    /// Returns the current connectivity state.
    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Subscribes to connectivity transitions.
    pub fn connectivity_changes(&self) -> watch::Receiver<bool> {
        self.connectivity.subscribe()
    }

    /// Returns the number of pending queue items.
    pub fn queue_length(&self) -> usize {
        self.queue.size()
    }

    /// Returns a snapshot of the pending queue, oldest first.
    pub fn pending_items(&self) -> Vec<SyncQueueItem> {
        self.queue.dequeue_all()
    }

    /// Drops every cached entity and pending mutation.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be written at all.
    pub fn clear(&self) -> SyncResult<()> {
        self.queue.clear_in_memory();
        let removed = self.store.clear()?;
        info!(removed, "cleared offline cache");
        Ok(())
    }

    fn owner(&self) -> Option<String> {
        self.identity.current_identity().map(|identity| identity.id)
    }

    async fn forward(&self, item: &SyncQueueItem) {
        let outcome = self.executor.sync_one(item).await;
        debug!(
            entity_type = %item.entity_type,
            entity_id = %item.entity_id,
            ?outcome,
            "forward write"
        );
    }

    fn prune(&self, now: DateTime<Utc>) {
        let Some(retention) = self.config.cache_retention else {
            return;
        };
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return;
        };
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return;
        };
        if let Err(e) = self.store.prune_confirmed(cutoff) {
            warn!(error = %e, "failed to prune cache");
        }
    }
}

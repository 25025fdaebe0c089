//! Durable sync queue.

use crate::error::SyncResult;
use crate::store::LocalStore;
use chrono::{DateTime, Utc};
use notesync_protocol::{EntityKey, EntityType, Operation, Payload, PendingQueue, SyncQueueItem};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Ordered pending mutations, written through to the local store.
///
/// The in-memory [`PendingQueue`] is the source of truth while the process
/// runs; the store copy exists to survive restarts. Every mutation updates
/// both under one lock so they never disagree on ordering.
#[derive(Debug)]
pub struct SyncQueue {
    pending: Mutex<PendingQueue>,
    store: Arc<LocalStore>,
}

impl SyncQueue {
    /// Loads the queue persisted in `store`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be read at all.
    pub fn load(store: Arc<LocalStore>) -> SyncResult<Self> {
        let items = store.load_queue_items()?;
        let pending = PendingQueue::from_items(items);
        if !pending.is_empty() {
            info!(pending = pending.len(), "restored sync queue");
        }
        Ok(Self {
            pending: Mutex::new(pending),
            store,
        })
    }

    /// Queues a mutation, coalescing with any pending item for the entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the item cannot be persisted.
    pub fn enqueue(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        operation: Operation,
        payload: Payload,
        owner: Option<String>,
        now: DateTime<Utc>,
    ) -> SyncResult<SyncQueueItem> {
        let mut pending = self.pending.lock();
        let result = pending.enqueue(entity_type, entity_id, operation, payload, owner, now);
        self.store.put_queue_item(&result.item)?;

        debug!(
            entity_type = %entity_type,
            entity_id,
            queue_id = %result.item.queue_id,
            operation = %result.item.operation,
            coalesced = result.coalesced,
            "queued mutation"
        );
        Ok(result.item)
    }

    /// Returns a snapshot of every pending item, oldest first.
    pub fn dequeue_all(&self) -> Vec<SyncQueueItem> {
        self.pending.lock().snapshot()
    }

    /// Returns the live item with the given queue ID.
    pub fn find(&self, queue_id: &str) -> Option<SyncQueueItem> {
        self.pending.lock().find(queue_id).cloned()
    }

    /// Returns the pending item for an entity.
    pub fn get(&self, key: &EntityKey) -> Option<SyncQueueItem> {
        self.pending.lock().get(key).cloned()
    }

    /// Removes an item unconditionally.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be persisted.
    pub fn remove(&self, queue_id: &str) -> SyncResult<Option<SyncQueueItem>> {
        let mut pending = self.pending.lock();
        let removed = pending.remove(queue_id);
        if removed.is_some() {
            self.store.remove_queue_item(queue_id)?;
        }
        Ok(removed)
    }

    /// Removes an item only if no newer mutation was folded in since
    /// `revision`.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be persisted.
    pub fn remove_if_unchanged(
        &self,
        queue_id: &str,
        revision: u64,
    ) -> SyncResult<Option<SyncQueueItem>> {
        let mut pending = self.pending.lock();
        let removed = pending.remove_if_unchanged(queue_id, revision);
        if removed.is_some() {
            self.store.remove_queue_item(queue_id)?;
        }
        Ok(removed)
    }

    /// Records that the remote store created the entity, so a pending create
    /// folded in meanwhile is sent as an update.
    ///
    /// # Errors
    ///
    /// Returns an error if the change cannot be persisted.
    pub fn confirm_created(&self, queue_id: &str) -> SyncResult<()> {
        let mut pending = self.pending.lock();
        if let Some(item) = pending.confirm_created(queue_id).cloned() {
            self.store.put_queue_item(&item)?;
        }
        Ok(())
    }

    /// Counts a failed attempt and returns the updated item.
    ///
    /// # Errors
    ///
    /// Returns an error if the new retry count cannot be persisted.
    pub fn record_failure(&self, queue_id: &str) -> SyncResult<Option<SyncQueueItem>> {
        let mut pending = self.pending.lock();
        let Some(item) = pending.record_failure(queue_id).cloned() else {
            return Ok(None);
        };
        self.store.put_queue_item(&item)?;
        Ok(Some(item))
    }

    /// Returns the number of pending items.
    pub fn size(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drops every pending item from memory. The caller clears the store.
    pub(crate) fn clear_in_memory(&self) {
        self.pending.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use notesync_storage::{InMemoryBackend, KvBackend};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap()
    }

    fn title(value: &str) -> Payload {
        json!({ "title": value }).as_object().cloned().unwrap()
    }

    #[test]
    fn survives_reload() {
        let backend: Arc<dyn KvBackend> = Arc::new(InMemoryBackend::new());
        let store = Arc::new(LocalStore::new(Arc::clone(&backend)));
        let queue = SyncQueue::load(Arc::clone(&store)).unwrap();

        queue
            .enqueue(EntityType::Note, "a", Operation::Create, title("1"), None, now())
            .unwrap();
        queue
            .enqueue(EntityType::Note, "b", Operation::Create, title("2"), None, now())
            .unwrap();
        let failed = queue
            .enqueue(EntityType::Note, "a", Operation::Update, title("3"), None, now())
            .unwrap();
        queue.record_failure(&failed.queue_id).unwrap();

        let reloaded = SyncQueue::load(Arc::new(LocalStore::new(backend))).unwrap();
        let items = reloaded.dequeue_all();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].entity_id, "a");
        assert_eq!(items[0].payload["title"], "3");
        assert_eq!(items[0].retry_count, 1);
        assert_eq!(items[1].entity_id, "b");
    }

    #[test]
    fn removal_is_persisted() {
        let backend: Arc<dyn KvBackend> = Arc::new(InMemoryBackend::new());
        let queue = SyncQueue::load(Arc::new(LocalStore::new(Arc::clone(&backend)))).unwrap();

        let item = queue
            .enqueue(EntityType::Tag, "t", Operation::Create, title("x"), None, now())
            .unwrap();
        assert!(queue
            .remove_if_unchanged(&item.queue_id, item.revision)
            .unwrap()
            .is_some());

        assert!(queue.is_empty());
        assert_eq!(backend.len().unwrap(), 0);
    }

    #[test]
    fn stale_revision_is_kept() {
        let queue =
            SyncQueue::load(Arc::new(LocalStore::new(Arc::new(InMemoryBackend::new())))).unwrap();

        let snapshot = queue
            .enqueue(EntityType::Note, "n", Operation::Update, title("a"), None, now())
            .unwrap();
        queue
            .enqueue(EntityType::Note, "n", Operation::Update, title("b"), None, now())
            .unwrap();

        assert!(queue
            .remove_if_unchanged(&snapshot.queue_id, snapshot.revision)
            .unwrap()
            .is_none());
        assert_eq!(queue.size(), 1);
        assert_eq!(
            queue.get(&EntityKey::new(EntityType::Note, "n")).unwrap().payload["title"],
            "b"
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn operation() -> impl Strategy<Value = Operation> {
            prop_oneof![
                Just(Operation::Create),
                Just(Operation::Update),
                Just(Operation::Delete),
            ]
        }

        proptest! {
            #[test]
            fn reload_matches_memory(
                steps in prop::collection::vec(("[a-d]", operation(), any::<bool>()), 1..40)
            ) {
                let backend: Arc<dyn KvBackend> = Arc::new(InMemoryBackend::new());
                let queue = SyncQueue::load(Arc::new(LocalStore::new(Arc::clone(&backend)))).unwrap();

                for (id, op, drop_oldest) in steps {
                    queue
                        .enqueue(EntityType::Note, &id, op, title(&id), None, now())
                        .unwrap();
                    if drop_oldest {
                        let oldest = queue.dequeue_all()[0].queue_id.clone();
                        queue.remove(&oldest).unwrap();
                    }
                }

                let reloaded = SyncQueue::load(Arc::new(LocalStore::new(backend))).unwrap();
                prop_assert_eq!(reloaded.dequeue_all(), queue.dequeue_all());
            }
        }
    }
}

//! Ordered queue of pending mutations.

use crate::entity::{EntityKey, EntityType, Payload};
use crate::item::{Operation, SyncQueueItem};
use chrono::{DateTime, Utc};

/// Result of an enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueResult {
    /// The live item for the entity after the enqueue.
    pub item: SyncQueueItem,
    /// Whether the mutation was folded into an existing item.
    pub coalesced: bool,
}

/// An ordered queue of pending mutations, one item per entity.
///
/// # Invariants
///
/// - At most one item per (entity type, entity id)
/// - Items are kept in ascending `position`; coalescing never moves an item
/// - `retry_count` survives coalescing
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    items: Vec<SyncQueueItem>,
    next_position: u64,
}

impl PendingQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a queue from persisted items.
    ///
    /// Items are ordered by position. If two items claim the same entity the
    /// one with the higher position wins, so a damaged store never breaks the
    /// one-item-per-entity invariant.
    pub fn from_items(mut items: Vec<SyncQueueItem>) -> Self {
        items.sort_by_key(|item| item.position);

        let mut queue = Self::new();
        for item in items {
            if let Some(index) = queue.index_of_key(item.entity_type, &item.entity_id) {
                queue.items.remove(index);
            }
            queue.next_position = queue.next_position.max(item.position + 1);
            queue.items.push(item);
        }
        queue
    }

    /// Queues a mutation, coalescing with any pending item for the entity.
    pub fn enqueue(
        &mut self,
        entity_type: EntityType,
        entity_id: &str,
        operation: Operation,
        payload: Payload,
        owner: Option<String>,
        now: DateTime<Utc>,
    ) -> EnqueueResult {
        if let Some(index) = self.index_of_key(entity_type, entity_id) {
            let item = &mut self.items[index];
            item.coalesce(operation, payload, now);
            if owner.is_some() {
                item.owner = owner;
            }
            return EnqueueResult {
                item: item.clone(),
                coalesced: true,
            };
        }

        let position = self.next_position;
        self.next_position += 1;
        let item = SyncQueueItem::new(entity_type, entity_id, operation, payload, position, now)
            .with_owner(owner);
        self.items.push(item.clone());
        EnqueueResult {
            item,
            coalesced: false,
        }
    }

    /// Returns a snapshot of every item, oldest position first.
    pub fn snapshot(&self) -> Vec<SyncQueueItem> {
        self.items.clone()
    }

    /// Iterates over the items in order.
    pub fn iter(&self) -> impl Iterator<Item = &SyncQueueItem> {
        self.items.iter()
    }

    /// Returns the pending item for an entity.
    pub fn get(&self, key: &EntityKey) -> Option<&SyncQueueItem> {
        self.index_of_key(key.entity_type, &key.id)
            .map(|index| &self.items[index])
    }

    /// Returns the item with the given queue ID.
    pub fn find(&self, queue_id: &str) -> Option<&SyncQueueItem> {
        self.items.iter().find(|item| item.queue_id == queue_id)
    }

    /// Removes an item unconditionally.
    pub fn remove(&mut self, queue_id: &str) -> Option<SyncQueueItem> {
        let index = self.items.iter().position(|item| item.queue_id == queue_id)?;
        Some(self.items.remove(index))
    }

    /// Removes an item only if it has not been coalesced since `revision`.
    ///
    /// Returns `None` when the item is gone or carries a newer mutation that
    /// still has to be sent.
    pub fn remove_if_unchanged(&mut self, queue_id: &str, revision: u64) -> Option<SyncQueueItem> {
        let index = self
            .items
            .iter()
            .position(|item| item.queue_id == queue_id && item.revision == revision)?;
        Some(self.items.remove(index))
    }

    /// Turns a pending create into an update once the remote store has
    /// created the entity. Returns the item if it changed.
    pub fn confirm_created(&mut self, queue_id: &str) -> Option<&SyncQueueItem> {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.queue_id == queue_id && item.operation == Operation::Create)?;
        item.operation = Operation::Update;
        Some(item)
    }

    /// Records a failed attempt and returns the updated item.
    pub fn record_failure(&mut self, queue_id: &str) -> Option<&SyncQueueItem> {
        let item = self.items.iter_mut().find(|item| item.queue_id == queue_id)?;
        item.retry_count += 1;
        Some(item)
    }

    /// Returns the number of pending items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Removes every item.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn index_of_key(&self, entity_type: EntityType, entity_id: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.entity_type == entity_type && item.entity_id == entity_id)
    }
}

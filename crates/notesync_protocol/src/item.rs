//! Pending sync operations.

use crate::codec::{decode_record, encode_record};
use crate::entity::{EntityKey, EntityType, Payload};
use crate::error::CodecResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of mutation waiting to reach the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Entity does not exist remotely yet.
    Create,
    /// Entity exists remotely and must be overwritten.
    Update,
    /// Entity must be removed remotely.
    Delete,
}

impl Operation {
    /// Combines a pending operation with a newer one for the same entity.
    ///
    /// An update on top of a create that never reached the remote store is
    /// still a create; every other combination takes the newer operation.
    pub fn coalesce(self, newer: Operation) -> Operation {
        match (self, newer) {
            (Operation::Create, Operation::Update) => Operation::Create,
            (_, newer) => newer,
        }
    }

    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending mutation for one entity.
///
/// # Fields
///
/// - `queue_id`: stable identifier, kept across coalescing
/// - `revision`: bumped every time a newer mutation is folded in
/// - `position`: ordering slot, kept across coalescing so churny entities
///   never push older ones back
/// - `retry_count`: failed attempts so far, never reset by coalescing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Queue item ID.
    pub queue_id: String,
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity ID.
    pub entity_id: String,
    /// Latest payload (empty for deletes).
    pub payload: Payload,
    /// Operation to apply remotely.
    pub operation: Operation,
    /// When the first mutation for this entity was queued.
    pub enqueued_at: DateTime<Utc>,
    /// When the latest mutation was folded in.
    pub updated_at: DateTime<Utc>,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Coalescing revision.
    pub revision: u64,
    /// Ordering slot.
    pub position: u64,
    /// Identity that produced the mutation, if any.
    pub owner: Option<String>,
}

impl SyncQueueItem {
    /// Creates a fresh item with a new queue ID.
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        operation: Operation,
        payload: Payload,
        position: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            queue_id: uuid::Uuid::new_v4().to_string(),
            entity_type,
            entity_id: entity_id.into(),
            payload,
            operation,
            enqueued_at: now,
            updated_at: now,
            retry_count: 0,
            revision: 0,
            position,
            owner: None,
        }
    }

    /// Attributes the item to an identity.
    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    /// Returns the key of the entity this item mutates.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.entity_id.clone())
    }

    /// Folds a newer mutation into this item in place.
    pub fn coalesce(&mut self, operation: Operation, payload: Payload, now: DateTime<Utc>) {
        self.operation = self.operation.coalesce(operation);
        self.payload = payload;
        self.updated_at = now;
        self.revision += 1;
    }

    /// Encodes to a versioned CBOR record.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        encode_record(self)
    }

    /// Decodes from a versioned CBOR record.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_record(bytes)
    }
}

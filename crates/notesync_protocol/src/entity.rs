//! Cached entity types.

use crate::codec::{decode_record, encode_record};
use crate::error::{CodecError, CodecResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The record body of an entity, as exchanged with the remote store.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Kinds of entity the offline cache knows how to sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// A note.
    Note,
    /// A project grouping notes.
    Project,
    /// A tag attached to notes.
    Tag,
}

impl EntityType {
    /// Every entity type, in a stable order.
    pub const ALL: [EntityType; 3] = [EntityType::Note, EntityType::Project, EntityType::Tag];

    /// Returns the lowercase name used in storage keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Note => "note",
            EntityType::Project => "project",
            EntityType::Tag => "tag",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "note" => Ok(EntityType::Note),
            "project" => Ok(EntityType::Project),
            "tag" => Ok(EntityType::Tag),
            other => Err(CodecError::UnknownEntityType(other.to_string())),
        }
    }
}

/// Where the cached copy of an entity last came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Written locally and not yet confirmed by the remote store.
    Local,
    /// Confirmed by, or fetched from, the remote store.
    Server,
}

/// Identifies one entity across the cache and the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity ID.
    pub id: String,
}

impl EntityKey {
    /// Creates a new key.
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.id)
    }
}

/// A locally cached copy of an entity.
///
/// There is at most one cached entity per (scope, entity type, id); each save
/// overwrites the previous copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntity {
    /// Entity ID.
    pub id: String,
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity body.
    pub payload: Payload,
    /// Time of the last local write or server confirmation.
    pub updated_at: DateTime<Utc>,
    /// Whether the copy is still waiting for the remote store.
    pub origin: Origin,
}

impl CachedEntity {
    /// Creates a locally written, unconfirmed entity.
    pub fn local(
        entity_type: EntityType,
        id: impl Into<String>,
        payload: Payload,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            entity_type,
            payload,
            updated_at,
            origin: Origin::Local,
        }
    }

    /// Creates an entity confirmed by the remote store.
    pub fn from_server(
        entity_type: EntityType,
        id: impl Into<String>,
        payload: Payload,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            entity_type,
            payload,
            updated_at,
            origin: Origin::Server,
        }
    }

    /// Returns the key of this entity.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.id.clone())
    }

    /// Returns true if the remote store has not confirmed this copy yet.
    pub fn is_pending(&self) -> bool {
        self.origin == Origin::Local
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

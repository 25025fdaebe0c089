//! # NoteSync Protocol
//!
//! Data model, record codec and conflict resolution for the NoteSync
//! offline cache.
//!
//! This crate provides:
//! - [`CachedEntity`] and [`EntityType`] for locally cached notes, projects and tags
//! - [`SyncQueueItem`] and [`PendingQueue`] for coalesced pending mutations
//! - A versioned CBOR record codec for everything that is persisted
//! - [`ConflictStrategy`] for choosing between local and server versions
//!
//! This is a pure crate with no I/O operations. Time is always passed in by
//! the caller, so every function here is deterministic.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod conflict;
mod entity;
mod error;
mod item;
mod queue;

pub use codec::{decode_record, encode_record, RECORD_VERSION};
pub use conflict::{
    resolve, ConflictDecision, ConflictStrategy, ConflictWinner, EntityVersion, ManualResolver,
    UPDATED_AT_FIELD,
};
pub use entity::{CachedEntity, EntityKey, EntityType, Origin, Payload};
pub use error::{CodecError, CodecResult};
pub use item::{Operation, SyncQueueItem};
pub use queue::{EnqueueResult, PendingQueue};

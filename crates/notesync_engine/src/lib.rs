//! # NoteSync Engine
//!
//! Offline cache and synchronization layer for the NoteSync notes app.
//!
//! This crate provides:
//! - [`CacheService`], the facade the application saves, deletes and reads through
//! - A durable sync queue of pending mutations, coalesced per entity
//! - A remote sync executor with retry ceiling, rejection and conflict handling
//! - [`ConnectivityMonitor`] and [`SyncWorker`] for automatic flushing
//! - Ports for the remote store, identity, notifications and time
//!
//! ## Architecture
//!
//! Writes follow an **optimistic local commit** model:
//! 1. The entity is written to the local store and the mutation is queued
//! 2. When online, the mutation is forwarded immediately
//! 3. Anything still queued is drained when connectivity returns and on a timer
//!
//! ## Key Invariants
//!
//! - Reads reflect every preceding local write
//! - At most one pending mutation per entity; the newest payload wins
//! - A failing item never blocks the items queued after it
//! - Two remote calls for the same entity are never in flight together
//! - A store failure degrades to a memory-only cache instead of failing callers

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod error;
mod executor;
mod ports;
mod queue;
mod remote;
mod service;
mod state;
mod store;
mod worker;

pub use config::{
    SyncConfig, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_RETRIES, DEFAULT_OPERATION_TIMEOUT,
};
pub use connectivity::{ConnectivityMonitor, IntervalTicker, Ticker};
pub use error::{SyncError, SyncResult};
pub use ports::{
    Anonymous, Clock, Identity, IdentityProvider, LogNotifier, ManualClock, Notifier, Severity,
    StaticIdentity, SystemClock, ANONYMOUS_SCOPE,
};
pub use queue::SyncQueue;
pub use remote::{MockRemoteStore, RemoteCall, RemoteEntity, RemoteError, RemoteStore};
pub use service::{CacheService, CacheServiceBuilder};
pub use state::{DrainReport, FlushOutcome, SyncEvent, SyncOutcome, SyncStatus};
pub use store::{LocalStore, QUEUE_PREFIX};
pub use worker::SyncWorker;

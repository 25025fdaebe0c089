//! Sync status, outcomes and events.

use crate::error::SyncError;
use chrono::{DateTime, Utc};
use notesync_protocol::{ConflictWinner, EntityKey, Operation};
use serde::Serialize;
use std::fmt;

/// Snapshot of the cache service, as shown in a status indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Current connectivity state.
    pub is_online: bool,
    /// Pending queue items.
    pub queue_length: usize,
    /// Cached entities for the current identity.
    pub cache_size: usize,
    /// End of the last completed drain pass.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Whether the durable store fell back to memory.
    pub degraded: bool,
}

/// Result of processing one queue item.
#[derive(Debug)]
pub enum SyncOutcome {
    /// The mutation reached the remote store.
    Synced,
    /// A conflict was resolved in favor of `winner`.
    Resolved(ConflictWinner),
    /// The item was not dispatched: another operation for the same entity
    /// is in flight, or the item is already gone.
    Skipped,
    /// The attempt failed. Retryable failures leave the item queued.
    Failed(SyncError),
}

impl SyncOutcome {
    /// Returns true if the item left the queue successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Synced | SyncOutcome::Resolved(_))
    }
}

/// Counters for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Items in the snapshot.
    pub attempted: usize,
    /// Items applied remotely.
    pub synced: usize,
    /// Items that went through conflict resolution.
    pub resolved: usize,
    /// Items left queued after a retryable failure.
    pub retried: usize,
    /// Items rejected by the remote store.
    pub rejected: usize,
    /// Items dropped after exceeding the retry ceiling.
    pub abandoned: usize,
    /// Items not dispatched this pass.
    pub skipped: usize,
}

impl DrainReport {
    /// Counts one outcome.
    pub fn record(&mut self, outcome: &SyncOutcome) {
        self.attempted += 1;
        match outcome {
            SyncOutcome::Synced => self.synced += 1,
            SyncOutcome::Resolved(_) => self.resolved += 1,
            SyncOutcome::Skipped => self.skipped += 1,
            SyncOutcome::Failed(SyncError::QueueAbandoned { .. }) => self.abandoned += 1,
            SyncOutcome::Failed(e) if e.is_retryable() => self.retried += 1,
            SyncOutcome::Failed(_) => self.rejected += 1,
        }
    }
}

impl fmt::Display for DrainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} attempted, {} synced, {} resolved, {} retried, {} rejected, {} abandoned, {} skipped",
            self.attempted,
            self.synced,
            self.resolved,
            self.retried,
            self.rejected,
            self.abandoned,
            self.skipped
        )
    }
}

/// Result of a manual flush request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// A drain pass ran to completion.
    Completed(DrainReport),
    /// Another drain pass was already running.
    AlreadyRunning,
    /// The service is offline; nothing was attempted.
    Offline,
}

/// Notifications published by the cache service.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connectivity changed.
    ConnectivityChanged {
        /// New state.
        online: bool,
    },
    /// A mutation reached the remote store.
    Synced {
        /// Entity mutated.
        key: EntityKey,
        /// Operation applied.
        operation: Operation,
    },
    /// A conflict was resolved.
    ConflictResolved {
        /// Entity in conflict.
        key: EntityKey,
        /// Surviving side.
        winner: ConflictWinner,
    },
    /// The remote store rejected a mutation; the local copy is kept.
    PermanentFailure {
        /// Entity mutated.
        key: EntityKey,
        /// Rejection reason.
        reason: String,
    },
    /// A mutation exceeded the retry ceiling and was dropped along with its
    /// local copy.
    QueueAbandoned {
        /// Entity mutated.
        key: EntityKey,
        /// Failed attempts made.
        attempts: u32,
    },
    /// A drain pass finished.
    DrainCompleted(DrainReport),
}

#[cfg(test)]
mod tests {
    use super::*;
    use notesync_protocol::EntityType;

    #[test]
    fn report_counts_outcomes() {
        let key = EntityKey::new(EntityType::Note, "n1");
        let mut report = DrainReport::default();

        report.record(&SyncOutcome::Synced);
        report.record(&SyncOutcome::Resolved(ConflictWinner::Server));
        report.record(&SyncOutcome::Skipped);
        report.record(&SyncOutcome::Failed(SyncError::RetryableSync {
            key: key.clone(),
            message: "timeout".into(),
        }));
        report.record(&SyncOutcome::Failed(SyncError::PermanentSync {
            key: key.clone(),
            message: "invalid".into(),
        }));
        report.record(&SyncOutcome::Failed(SyncError::QueueAbandoned { key, attempts: 6 }));

        assert_eq!(
            report,
            DrainReport {
                attempted: 6,
                synced: 1,
                resolved: 1,
                retried: 1,
                rejected: 1,
                abandoned: 1,
                skipped: 1,
            }
        );
    }

    #[test]
    fn status_serializes_in_camel_case() {
        let status = SyncStatus {
            is_online: true,
            queue_length: 2,
            cache_size: 5,
            last_sync_time: None,
            degraded: false,
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["isOnline"], true);
        assert_eq!(json["queueLength"], 2);
        assert_eq!(json["cacheSize"], 5);
        assert!(json["lastSyncTime"].is_null());
    }
}

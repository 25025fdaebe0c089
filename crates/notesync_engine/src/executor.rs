//! Remote sync executor.
//!
//! Applies queued mutations to the remote store one at a time and folds the
//! outcome back into the queue and the local store:
//!
//! - success: the item leaves the queue and the cached copy becomes
//!   server-confirmed
//! - retryable failure: the retry count grows; past the ceiling the item and
//!   its local copy are dropped and the user is told once
//! - rejection: the item is dropped, the local copy is kept
//! - conflict: the configured strategy picks the survivor, which is pushed
//!   unless the remote store already holds it

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::ports::{Clock, Notifier, Severity, ANONYMOUS_SCOPE};
use crate::queue::SyncQueue;
use crate::remote::{RemoteEntity, RemoteError, RemoteStore};
use crate::state::{DrainReport, SyncEvent, SyncOutcome};
use crate::store::LocalStore;
use notesync_protocol::{
    resolve, CachedEntity, ConflictDecision, ConflictWinner, EntityKey, EntityVersion, Operation,
    Payload, SyncQueueItem,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Marks an entity as having a remote call in flight for as long as the
/// guard lives.
struct InFlightGuard<'a> {
    keys: &'a Mutex<HashSet<EntityKey>>,
    key: EntityKey,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(keys: &'a Mutex<HashSet<EntityKey>>, key: EntityKey) -> Option<Self> {
        if keys.lock().insert(key.clone()) {
            Some(Self { keys, key })
        } else {
            None
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.keys.lock().remove(&self.key);
    }
}

pub(crate) struct SyncExecutor<R: RemoteStore> {
    remote: Arc<R>,
    store: Arc<LocalStore>,
    queue: Arc<SyncQueue>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    events: broadcast::Sender<SyncEvent>,
    in_flight: Mutex<HashSet<EntityKey>>,
}

impl<R: RemoteStore> SyncExecutor<R> {
    pub(crate) fn new(
        remote: Arc<R>,
        store: Arc<LocalStore>,
        queue: Arc<SyncQueue>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            remote,
            store,
            queue,
            config,
            clock,
            notifier,
            events,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Processes every item of a queue snapshot in order. A failed item never
    /// stops the ones after it.
    pub(crate) async fn drain(&self) -> DrainReport {
        let items = self.queue.dequeue_all();
        let mut report = DrainReport::default();

        for item in &items {
            let outcome = self.sync_one(item).await;
            report.record(&outcome);
        }
        report
    }

    /// Applies one queued mutation remotely.
    pub(crate) async fn sync_one(&self, item: &SyncQueueItem) -> SyncOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, item.key()) else {
            debug!(
                entity_type = %item.entity_type,
                entity_id = %item.entity_id,
                "operation already in flight for entity"
            );
            return SyncOutcome::Skipped;
        };

        // The snapshot may be stale; send what is queued now
        let Some(item) = self.queue.find(&item.queue_id) else {
            return SyncOutcome::Skipped;
        };

        match self.dispatch(&item).await {
            Ok(remote) => self.on_success(&item, remote),
            Err(RemoteError::Conflict { remote }) => self.on_conflict(&item, remote).await,
            Err(e) if e.is_retryable() => self.retry_or_abandon(&item, e.to_string()),
            Err(e) => self.reject(&item, e.to_string()),
        }
    }

    async fn dispatch(&self, item: &SyncQueueItem) -> Result<Option<RemoteEntity>, RemoteError> {
        let entity_type = item.entity_type;
        let id = item.entity_id.as_str();

        match item.operation {
            Operation::Create => self
                .bounded(self.remote.create(entity_type, &item.payload))
                .await
                .map(Some),
            Operation::Update => self
                .bounded(self.remote.update(entity_type, id, &item.payload))
                .await
                .map(Some),
            Operation::Delete => self
                .bounded(self.remote.delete(entity_type, id))
                .await
                .map(|()| None),
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        tokio::time::timeout(self.config.operation_timeout, call)
            .await
            .unwrap_or(Err(RemoteError::Timeout))
    }

    fn on_success(&self, item: &SyncQueueItem, remote: Option<RemoteEntity>) -> SyncOutcome {
        let key = item.key();

        let removed = match self.queue.remove_if_unchanged(&item.queue_id, item.revision) {
            Ok(removed) => removed.is_some(),
            Err(e) => {
                warn!(%key, error = %e, "failed to persist queue removal");
                true
            }
        };

        if removed {
            let scope = scope_of(item);
            let stored = match remote {
                Some(entity) => self.store.put_entity(
                    scope,
                    &CachedEntity::from_server(
                        item.entity_type,
                        item.entity_id.clone(),
                        entity.payload,
                        self.clock.now(),
                    ),
                ),
                None => self
                    .store
                    .remove_entity(scope, item.entity_type, &item.entity_id)
                    .map(|_| ()),
            };
            if let Err(e) = stored {
                warn!(%key, error = %e, "failed to record confirmed entity");
            }
        } else {
            debug!(%key, "newer mutation queued while in flight; keeping it");
            if item.operation == Operation::Create {
                if let Err(e) = self.queue.confirm_created(&item.queue_id) {
                    warn!(%key, error = %e, "failed to persist queue item");
                }
            }
        }

        info!(
            entity_type = %item.entity_type,
            entity_id = %item.entity_id,
            operation = %item.operation,
            "synced"
        );
        self.emit(SyncEvent::Synced {
            key,
            operation: item.operation,
        });
        SyncOutcome::Synced
    }

    async fn on_conflict(&self, item: &SyncQueueItem, remote: Payload) -> SyncOutcome {
        let key = item.key();
        let now = self.clock.now();

        let decision = if item.operation == Operation::Delete {
            // The remote copy changed after the delete was queued
            ConflictDecision {
                winner: ConflictWinner::Server,
                payload: remote.clone(),
                updated_at: None,
            }
        } else {
            let mut local = EntityVersion::from_payload(item.payload.clone());
            if local.updated_at.is_none() {
                local.updated_at = Some(item.updated_at);
            }
            resolve(
                &local,
                &EntityVersion::from_payload(remote.clone()),
                &self.config.conflict_strategy,
                now,
            )
        };

        info!(
            %key,
            winner = ?decision.winner,
            strategy = self.config.conflict_strategy.name(),
            "resolved conflict"
        );
        let winner = decision.winner;

        if decision.payload == remote {
            // The remote store already holds the surviving version
            let entity = CachedEntity::from_server(
                item.entity_type,
                item.entity_id.clone(),
                decision.payload,
                decision.updated_at.unwrap_or(now),
            );
            return self.finish_resolved(item, entity, winner);
        }

        if self.is_current(item) {
            let pending = CachedEntity::local(
                item.entity_type,
                item.entity_id.clone(),
                decision.payload.clone(),
                now,
            );
            if let Err(e) = self.store.put_entity(scope_of(item), &pending) {
                warn!(%key, error = %e, "failed to record resolved entity");
            }
        }

        let pushed = self
            .bounded(
                self.remote
                    .update(item.entity_type, &item.entity_id, &decision.payload),
            )
            .await;

        match pushed {
            Ok(entity) => {
                let confirmed = CachedEntity::from_server(
                    item.entity_type,
                    item.entity_id.clone(),
                    entity.payload,
                    self.clock.now(),
                );
                self.finish_resolved(item, confirmed, winner)
            }
            Err(RemoteError::Conflict { .. }) => {
                self.retry_or_abandon(item, "conflict persisted after resolution".into())
            }
            Err(e) if e.is_retryable() => self.retry_or_abandon(item, e.to_string()),
            Err(e) => self.reject(item, e.to_string()),
        }
    }

    fn finish_resolved(
        &self,
        item: &SyncQueueItem,
        entity: CachedEntity,
        winner: ConflictWinner,
    ) -> SyncOutcome {
        let key = item.key();

        match self.queue.remove_if_unchanged(&item.queue_id, item.revision) {
            Ok(Some(_)) => {
                if let Err(e) = self.store.put_entity(scope_of(item), &entity) {
                    warn!(%key, error = %e, "failed to record resolved entity");
                }
            }
            Ok(None) => debug!(%key, "newer mutation queued while resolving; keeping it"),
            Err(e) => warn!(%key, error = %e, "failed to persist queue removal"),
        }

        self.emit(SyncEvent::ConflictResolved { key, winner });
        SyncOutcome::Resolved(winner)
    }

    fn retry_or_abandon(&self, item: &SyncQueueItem, message: String) -> SyncOutcome {
        let key = item.key();

        let retry_count = match self.queue.record_failure(&item.queue_id) {
            Ok(Some(updated)) => updated.retry_count,
            Ok(None) => return SyncOutcome::Skipped,
            Err(e) => {
                warn!(%key, error = %e, "failed to persist retry count");
                item.retry_count + 1
            }
        };

        if retry_count > self.config.max_retries {
            return self.abandon(item, retry_count);
        }

        warn!(
            entity_type = %item.entity_type,
            entity_id = %item.entity_id,
            queue_id = %item.queue_id,
            retry_count,
            error = %message,
            "sync failed; will retry"
        );
        SyncOutcome::Failed(SyncError::RetryableSync { key, message })
    }

    fn abandon(&self, item: &SyncQueueItem, attempts: u32) -> SyncOutcome {
        let key = item.key();

        match self.queue.remove(&item.queue_id) {
            Ok(Some(_)) => {}
            // Someone else already dropped it and reported it
            Ok(None) => return SyncOutcome::Skipped,
            Err(e) => warn!(%key, error = %e, "failed to persist queue removal"),
        }

        if let Err(e) = self
            .store
            .remove_entity(scope_of(item), item.entity_type, &item.entity_id)
        {
            warn!(%key, error = %e, "failed to remove local copy");
        }

        error!(
            entity_type = %item.entity_type,
            entity_id = %item.entity_id,
            queue_id = %item.queue_id,
            retry_count = attempts,
            "abandoning queued mutation"
        );
        self.notifier.notify_user(
            &format!("Changes to {key} could not be synced after {attempts} attempts and were discarded"),
            Severity::Error,
        );
        self.emit(SyncEvent::QueueAbandoned {
            key: key.clone(),
            attempts,
        });
        SyncOutcome::Failed(SyncError::QueueAbandoned { key, attempts })
    }

    fn reject(&self, item: &SyncQueueItem, reason: String) -> SyncOutcome {
        let key = item.key();

        match self.queue.remove_if_unchanged(&item.queue_id, item.revision) {
            Ok(Some(_)) => {}
            Ok(None) => debug!(%key, "rejected mutation was superseded; keeping the newer one"),
            Err(e) => warn!(%key, error = %e, "failed to persist queue removal"),
        }

        warn!(
            entity_type = %item.entity_type,
            entity_id = %item.entity_id,
            queue_id = %item.queue_id,
            reason = %reason,
            "remote store rejected mutation"
        );
        self.notifier.notify_user(
            &format!("The server rejected changes to {key}: {reason}"),
            Severity::Warning,
        );
        self.emit(SyncEvent::PermanentFailure {
            key: key.clone(),
            reason: reason.clone(),
        });
        SyncOutcome::Failed(SyncError::PermanentSync {
            key,
            message: reason,
        })
    }

    fn is_current(&self, item: &SyncQueueItem) -> bool {
        self.queue
            .find(&item.queue_id)
            .is_some_and(|live| live.revision == item.revision)
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Scope the item's entity is cached under.
pub(crate) fn scope_of(item: &SyncQueueItem) -> &str {
    item.owner.as_deref().unwrap_or(ANONYMOUS_SCOPE)
}

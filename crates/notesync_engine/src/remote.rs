//! Remote store abstraction.

use async_trait::async_trait;
use notesync_protocol::{EntityKey, EntityType, Operation, Payload};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// An entity as returned by the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    /// Entity ID.
    pub id: String,
    /// Entity body as stored remotely.
    pub payload: Payload,
}

/// Failures reported by the remote store.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// The remote store could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The call did not complete in time.
    #[error("remote call timed out")]
    Timeout,

    /// The remote store failed internally (5xx).
    #[error("server error {status}: {message}")]
    Server {
        /// Status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// The remote store refused the mutation (validation, permissions).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The remote store holds a newer version of the entity.
    #[error("remote version conflicts with local change")]
    Conflict {
        /// The remote version.
        remote: Payload,
    },
}

impl RemoteError {
    /// Returns true if the call may succeed when attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Network(_) | RemoteError::Timeout | RemoteError::Server { .. }
        )
    }
}

/// The remote persistence service.
///
/// This trait abstracts the backend, allowing for different implementations
/// (HTTP client, in-process fake, mock for testing, etc.).
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Creates an entity. The payload carries the entity id.
    async fn create(
        &self,
        entity_type: EntityType,
        payload: &Payload,
    ) -> Result<RemoteEntity, RemoteError>;

    /// Overwrites an existing entity.
    async fn update(
        &self,
        entity_type: EntityType,
        id: &str,
        payload: &Payload,
    ) -> Result<RemoteEntity, RemoteError>;

    /// Deletes an entity. Deleting a missing entity succeeds.
    async fn delete(&self, entity_type: EntityType, id: &str) -> Result<(), RemoteError>;
}

/// A call received by [`MockRemoteStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    /// Remote operation invoked.
    pub operation: Operation,
    /// Entity targeted.
    pub key: EntityKey,
}

/// A mock remote store for testing.
///
/// Keeps entities in memory, records every call and replays scripted
/// failures per entity id.
#[derive(Debug)]
pub struct MockRemoteStore {
    connected: AtomicBool,
    entities: Mutex<BTreeMap<EntityKey, Payload>>,
    calls: Mutex<Vec<RemoteCall>>,
    failures: Mutex<HashMap<String, VecDeque<RemoteError>>>,
    delay: Mutex<Option<Duration>>,
}

impl MockRemoteStore {
    /// Creates a new, reachable mock store.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            entities: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
        }
    }

    /// Sets whether calls reach the store. Unreachable calls fail with a
    /// network error.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes every call sleep for `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Makes the next call for `id` fail with `error`.
    pub fn fail_next(&self, id: &str, error: RemoteError) {
        self.fail_times(id, error, 1);
    }

    /// Makes the next `times` calls for `id` fail with `error`.
    pub fn fail_times(&self, id: &str, error: RemoteError, times: usize) {
        let mut failures = self.failures.lock();
        let queue = failures.entry(id.to_string()).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Seeds the remote version of an entity.
    pub fn insert(&self, entity_type: EntityType, id: &str, payload: Payload) {
        self.entities
            .lock()
            .insert(EntityKey::new(entity_type, id), payload);
    }

    /// Returns the remote version of an entity.
    pub fn get(&self, entity_type: EntityType, id: &str) -> Option<Payload> {
        self.entities
            .lock()
            .get(&EntityKey::new(entity_type, id))
            .cloned()
    }

    /// Returns the number of stored entities.
    pub fn len(&self) -> usize {
        self.entities.lock().len()
    }

    /// Returns true if no entity is stored.
    pub fn is_empty(&self) -> bool {
        self.entities.lock().is_empty()
    }

    /// Returns every call received so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Returns the calls received for one entity id.
    pub fn calls_for(&self, id: &str) -> Vec<RemoteCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.key.id == id)
            .cloned()
            .collect()
    }

    async fn begin(&self, operation: Operation, key: EntityKey) -> Result<(), RemoteError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let id = key.id.clone();
        self.calls.lock().push(RemoteCall { operation, key });

        if !self.connected.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("remote unreachable".into()));
        }
        if let Some(error) = self
            .failures
            .lock()
            .get_mut(&id)
            .and_then(|queue| queue.pop_front())
        {
            return Err(error);
        }
        Ok(())
    }
}

impl Default for MockRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn create(
        &self,
        entity_type: EntityType,
        payload: &Payload,
    ) -> Result<RemoteEntity, RemoteError> {
        let id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RemoteError::Rejected("payload has no id".into()))?
            .to_string();

        self.begin(Operation::Create, EntityKey::new(entity_type, id.clone()))
            .await?;
        self.insert(entity_type, &id, payload.clone());
        Ok(RemoteEntity {
            id,
            payload: payload.clone(),
        })
    }

    async fn update(
        &self,
        entity_type: EntityType,
        id: &str,
        payload: &Payload,
    ) -> Result<RemoteEntity, RemoteError> {
        self.begin(Operation::Update, EntityKey::new(entity_type, id))
            .await?;
        self.insert(entity_type, id, payload.clone());
        Ok(RemoteEntity {
            id: id.to_string(),
            payload: payload.clone(),
        })
    }

    async fn delete(&self, entity_type: EntityType, id: &str) -> Result<(), RemoteError> {
        let key = EntityKey::new(entity_type, id);
        self.begin(Operation::Delete, key.clone()).await?;
        self.entities.lock().remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn retryable_classification() {
        assert!(RemoteError::Network("reset".into()).is_retryable());
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::Server {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!RemoteError::Rejected("invalid".into()).is_retryable());
        assert!(!RemoteError::Conflict {
            remote: Payload::new()
        }
        .is_retryable());
    }

    #[tokio::test]
    async fn mock_store_round_trip() {
        let remote = MockRemoteStore::new();

        let created = remote
            .create(EntityType::Note, &payload(json!({"id": "n1", "title": "A"})))
            .await
            .unwrap();
        assert_eq!(created.id, "n1");

        remote
            .update(EntityType::Note, "n1", &payload(json!({"id": "n1", "title": "B"})))
            .await
            .unwrap();
        assert_eq!(remote.get(EntityType::Note, "n1").unwrap()["title"], "B");

        remote.delete(EntityType::Note, "n1").await.unwrap();
        assert!(remote.is_empty());
        assert_eq!(remote.calls_for("n1").len(), 3);
    }

    #[tokio::test]
    async fn mock_store_not_connected_error() {
        let remote = MockRemoteStore::new();
        remote.set_connected(false);

        let result = remote.delete(EntityType::Tag, "t1").await;
        assert!(matches!(result, Err(RemoteError::Network(_))));
        assert_eq!(remote.calls().len(), 1);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let remote = MockRemoteStore::new();
        remote.fail_times("p1", RemoteError::Timeout, 2);

        for _ in 0..2 {
            let result = remote
                .update(EntityType::Project, "p1", &Payload::new())
                .await;
            assert_eq!(result, Err(RemoteError::Timeout));
        }
        assert!(remote
            .update(EntityType::Project, "p1", &Payload::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn create_without_id_is_rejected() {
        let remote = MockRemoteStore::new();
        let result = remote.create(EntityType::Note, &Payload::new()).await;
        assert!(matches!(result, Err(RemoteError::Rejected(_))));
        assert!(remote.calls().is_empty());
    }
}

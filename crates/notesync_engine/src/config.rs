//! Configuration for the offline cache and sync engine.

use notesync_protocol::ConflictStrategy;
use std::time::Duration;

/// Default number of retryable failures tolerated before an item is abandoned.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default period of the background flush timer.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on a single remote call.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the cache service.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retryable failures tolerated per item. The item is abandoned once its
    /// retry count exceeds this value.
    pub max_retries: u32,
    /// Period of the background flush timer.
    pub flush_interval: Duration,
    /// Bound on each remote call; elapsing counts as a retryable failure.
    pub operation_timeout: Duration,
    /// Strategy used when the remote store reports a newer version.
    pub conflict_strategy: ConflictStrategy,
    /// Age after which confirmed entries are pruned from the local store.
    pub cache_retention: Option<Duration>,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            conflict_strategy: ConflictStrategy::default(),
            cache_retention: None,
            event_capacity: 64,
        }
    }

    /// Sets the retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the flush timer period.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Sets the conflict strategy.
    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    /// Enables pruning of confirmed entries older than `retention`.
    pub fn with_cache_retention(mut self, retention: Duration) -> Self {
        self.cache_retention = Some(retention);
        self
    }

    /// Sets the event channel capacity (minimum 1).
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

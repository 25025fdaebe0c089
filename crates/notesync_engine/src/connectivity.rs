//! Connectivity state and flush timer.

use crate::config::SyncConfig;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Process-wide online/offline state.
///
/// Subscribers are woken only on transitions, so a receiver that sees a
/// change to `true` has observed a "became online" edge.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self { state }
    }

    /// Returns the current state.
    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Records a runtime connectivity notification.
    ///
    /// Returns true if the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "connectivity changed");
        }
        changed
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Source of periodic flush attempts.
#[async_trait]
pub trait Ticker: Send {
    /// Waits for the next tick. Must be cancel safe.
    async fn tick(&mut self);
}

/// Ticker backed by [`tokio::time::interval`].
///
/// The first tick fires one full period after creation; missed ticks are
/// not replayed in a burst.
#[derive(Debug)]
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    /// Creates a ticker with the given period. A zero period is raised to
    /// one millisecond.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    /// Creates a ticker firing every [`SyncConfig::flush_interval`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.flush_interval)
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

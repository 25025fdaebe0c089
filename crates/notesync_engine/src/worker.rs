//! Background flush loop.

use crate::connectivity::{IntervalTicker, Ticker};
use crate::remote::RemoteStore;
use crate::service::CacheService;
use crate::state::FlushOutcome;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Drives automatic drain passes for a [`CacheService`].
///
/// A pass runs on startup and whenever the service comes online, and on
/// every timer tick while online with a non-empty queue. The loop exits when
/// the shutdown channel flips to `true` or its sender is dropped.
pub struct SyncWorker<R: RemoteStore, T: Ticker> {
    service: Arc<CacheService<R>>,
    ticker: T,
    shutdown: watch::Receiver<bool>,
    connectivity: watch::Receiver<bool>,
}

impl<R: RemoteStore, T: Ticker> SyncWorker<R, T> {
    /// Creates a worker.
    ///
    /// Connectivity transitions are observed from this point on, even
    /// before [`SyncWorker::run`] is first polled.
    pub fn new(service: Arc<CacheService<R>>, ticker: T, shutdown: watch::Receiver<bool>) -> Self {
        let connectivity = service.connectivity_changes();
        Self {
            service,
            ticker,
            shutdown,
            connectivity,
        }
    }

    /// Runs until shutdown.
    pub async fn run(mut self) {
        info!("sync worker started");
        if self.service.is_online() && self.service.queue_length() > 0 {
            Self::flush(&self.service).await;
        }

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = self.connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *self.connectivity.borrow_and_update();
                    if online {
                        debug!("came online; flushing");
                        Self::flush(&self.service).await;
                    }
                }
                () = self.ticker.tick() => {
                    if self.service.is_online() && self.service.queue_length() > 0 {
                        Self::flush(&self.service).await;
                    }
                }
            }
        }

        info!("sync worker stopped");
    }

    async fn flush(service: &CacheService<R>) {
        match service.flush_now().await {
            FlushOutcome::Completed(report) => debug!(%report, "automatic drain pass"),
            FlushOutcome::AlreadyRunning => debug!("drain pass already running; skipping"),
            FlushOutcome::Offline => debug!("went offline before flushing"),
        }
    }
}

impl<R: RemoteStore> SyncWorker<R, IntervalTicker> {
    /// Creates a worker that retries on the service's configured
    /// [`flush_interval`](crate::SyncConfig::flush_interval).
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn with_interval(service: Arc<CacheService<R>>, shutdown: watch::Receiver<bool>) -> Self {
        let ticker = IntervalTicker::from_config(service.config());
        Self::new(service, ticker, shutdown)
    }
}

//! Integration tests for the cache service against a mock remote store.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use notesync_engine::{
    CacheService, Clock, DrainReport, FlushOutcome, Identity, ManualClock, MockRemoteStore,
    Notifier, RemoteError, Severity, StaticIdentity, SyncConfig, SyncError, SyncEvent, SyncWorker,
    Ticker, DEFAULT_FLUSH_INTERVAL,
};
use notesync_protocol::{ConflictWinner, EntityKey, EntityType, Operation, Origin, Payload};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

/// A notifier that remembers what it was asked to show.
#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<(String, Severity)>>,
}

impl RecordingNotifier {
    fn count(&self, severity: Severity) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|(_, s)| *s == severity)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_user(&self, message: &str, severity: Severity) {
        self.messages.lock().push((message.to_string(), severity));
    }
}

/// A ticker driven by the test.
struct ChannelTicker(mpsc::UnboundedReceiver<()>);

#[async_trait]
impl Ticker for ChannelTicker {
    async fn tick(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap()
}

fn note(title: &str) -> Payload {
    payload(json!({ "title": title }))
}

fn completed(outcome: FlushOutcome) -> DrainReport {
    match outcome {
        FlushOutcome::Completed(report) => report,
        other => panic!("expected a completed drain pass, got {other:?}"),
    }
}

fn drain_events(events: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}

async fn next_drain(events: &mut broadcast::Receiver<SyncEvent>) -> DrainReport {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            if let Ok(SyncEvent::DrainCompleted(report)) = events.recv().await {
                return report;
            }
        }
    })
    .await
    .expect("no drain pass within 60s")
}

#[tokio::test]
async fn offline_saves_sync_on_reconnect() {
    let remote = Arc::new(MockRemoteStore::new());
    let service = CacheService::builder(Arc::clone(&remote))
        .with_online(false)
        .build()
        .unwrap();

    for id in ["n1", "n2", "n3"] {
        service.save(EntityType::Note, id, note(id)).await.unwrap();
    }
    assert_eq!(service.queue_length(), 3);
    assert!(remote.calls().is_empty());
    assert_eq!(service.flush_now().await, FlushOutcome::Offline);

    assert!(service.set_online(true));
    let report = completed(service.flush_now().await);

    assert_eq!(report.synced, 3);
    assert_eq!(remote.calls().len(), 3);
    assert!(remote
        .calls()
        .iter()
        .all(|call| call.operation == Operation::Create));
    assert_eq!(service.queue_length(), 0);

    let notes = service.load_all(EntityType::Note).unwrap();
    assert_eq!(notes.len(), 3);
    assert!(notes.iter().all(|n| n.origin == Origin::Server));
    assert!(service.sync_status().last_sync_time.is_some());
}

#[tokio::test]
async fn repeated_saves_coalesce_into_one_call() {
    let remote = Arc::new(MockRemoteStore::new());
    let service = CacheService::builder(Arc::clone(&remote))
        .with_online(false)
        .build()
        .unwrap();

    service.save(EntityType::Note, "n1", note("A")).await.unwrap();
    service.save(EntityType::Note, "n1", note("B")).await.unwrap();
    assert_eq!(service.queue_length(), 1);

    service.set_online(true);
    completed(service.flush_now().await);

    let calls = remote.calls_for("n1");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].operation, Operation::Create);
    assert_eq!(remote.get(EntityType::Note, "n1").unwrap()["title"], "B");
}

#[tokio::test]
async fn edits_to_synced_entities_are_updates() {
    let remote = Arc::new(MockRemoteStore::new());
    let service = CacheService::builder(Arc::clone(&remote)).build().unwrap();

    service.save(EntityType::Project, "p1", note("Home")).await.unwrap();
    service.save(EntityType::Project, "p1", note("House")).await.unwrap();
    service.save(EntityType::Project, "p1", note("Flat")).await.unwrap();

    let operations: Vec<_> = remote
        .calls_for("p1")
        .into_iter()
        .map(|call| call.operation)
        .collect();
    assert_eq!(
        operations,
        vec![Operation::Create, Operation::Update, Operation::Update]
    );
    assert_eq!(remote.get(EntityType::Project, "p1").unwrap()["title"], "Flat");
}

#[tokio::test]
async fn reads_reflect_local_writes() {
    let remote = Arc::new(MockRemoteStore::new());
    let service = CacheService::builder(Arc::clone(&remote))
        .with_online(false)
        .build()
        .unwrap();

    service
        .save(EntityType::Tag, "t1", note("urgent"))
        .await
        .unwrap();
    let tags = service.load_all(EntityType::Tag).unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].payload["title"], "urgent");
    assert_eq!(tags[0].payload["id"], "t1");
    assert!(tags[0].is_pending());

    service.delete(EntityType::Tag, "t1").await.unwrap();
    assert!(service.load_all(EntityType::Tag).unwrap().is_empty());
    assert!(service.get(EntityType::Tag, "t1").unwrap().is_none());

    let result = service.save(EntityType::Tag, "t1", note("again")).await;
    assert!(matches!(result, Err(SyncError::EntityDeleted { .. })));

    service.set_online(true);
    completed(service.flush_now().await);

    let calls = remote.calls_for("t1");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].operation, Operation::Delete);
    assert!(service.save(EntityType::Tag, "t1", note("again")).await.is_ok());
}

#[tokio::test]
async fn load_all_is_newest_first() {
    let remote = Arc::new(MockRemoteStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
    ));
    let service = CacheService::builder(remote)
        .with_clock(clock.clone())
        .with_online(false)
        .build()
        .unwrap();

    for id in ["first", "second", "third"] {
        service.save(EntityType::Note, id, note(id)).await.unwrap();
        clock.advance(chrono::Duration::minutes(1));
    }

    let ids: Vec<_> = service
        .load_all(EntityType::Note)
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(ids, vec!["third", "second", "first"]);
}

#[tokio::test]
async fn saves_are_stamped_with_save_time() {
    let remote = Arc::new(MockRemoteStore::new());
    let saved_at = Utc.with_ymd_and_hms(2026, 4, 2, 15, 30, 0).unwrap();
    let service = CacheService::builder(Arc::clone(&remote))
        .with_clock(Arc::new(ManualClock::new(saved_at)))
        .build()
        .unwrap();

    let stale = payload(json!({ "title": "x", "updatedAt": "2020-01-01T00:00:00Z" }));
    let entity = service.save(EntityType::Note, "n1", stale).await.unwrap();

    let expected = json!(saved_at.to_rfc3339());
    assert_eq!(entity.payload["updatedAt"], expected);
    assert_eq!(entity.updated_at, saved_at);
    assert_eq!(remote.get(EntityType::Note, "n1").unwrap()["updatedAt"], expected);
}

#[tokio::test]
async fn retryable_failure_does_not_block_later_items() {
    let remote = Arc::new(MockRemoteStore::new());
    let service = CacheService::builder(Arc::clone(&remote))
        .with_online(false)
        .build()
        .unwrap();

    for id in ["a", "b", "c", "d"] {
        service.save(EntityType::Note, id, note(id)).await.unwrap();
    }
    remote.fail_next(
        "b",
        RemoteError::Server {
            status: 503,
            message: "unavailable".into(),
        },
    );

    service.set_online(true);
    let report = completed(service.flush_now().await);

    assert_eq!(report.synced, 3);
    assert_eq!(report.retried, 1);
    let pending = service.pending_items();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].entity_id, "b");
    assert_eq!(pending[0].retry_count, 1);
    assert!(remote.get(EntityType::Note, "c").is_some());
    assert!(remote.get(EntityType::Note, "d").is_some());
}

#[tokio::test]
async fn abandonment_is_reported_exactly_once() {
    let remote = Arc::new(MockRemoteStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let service = CacheService::builder(Arc::clone(&remote))
        .with_notifier(notifier.clone())
        .with_online(false)
        .build()
        .unwrap();
    let mut events = service.subscribe();

    service.save(EntityType::Note, "n1", note("doomed")).await.unwrap();
    remote.fail_times("n1", RemoteError::Network("reset".into()), 100);
    service.set_online(true);

    for attempt in 1..=5 {
        let report = completed(service.flush_now().await);
        assert_eq!(report.retried, 1, "attempt {attempt}");
        assert_eq!(service.queue_length(), 1);
    }

    let report = completed(service.flush_now().await);
    assert_eq!(report.abandoned, 1);
    assert_eq!(service.queue_length(), 0);
    assert!(service.load_all(EntityType::Note).unwrap().is_empty());

    let report = completed(service.flush_now().await);
    assert_eq!(report.attempted, 0);

    assert_eq!(remote.calls_for("n1").len(), 6);
    assert_eq!(notifier.count(Severity::Error), 1);
    let abandoned: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter(|event| matches!(event, SyncEvent::QueueAbandoned { .. }))
        .collect();
    assert_eq!(
        abandoned,
        vec![SyncEvent::QueueAbandoned {
            key: EntityKey::new(EntityType::Note, "n1"),
            attempts: 6,
        }]
    );
}

#[tokio::test]
async fn rejection_keeps_local_copy() {
    let remote = Arc::new(MockRemoteStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let service = CacheService::builder(Arc::clone(&remote))
        .with_notifier(notifier.clone())
        .build()
        .unwrap();
    let mut events = service.subscribe();
    remote.fail_next("n1", RemoteError::Rejected("title too long".into()));

    service.save(EntityType::Note, "n1", note("x")).await.unwrap();

    assert_eq!(service.queue_length(), 0);
    let local = service.get(EntityType::Note, "n1").unwrap().unwrap();
    assert_eq!(local.origin, Origin::Local);
    assert_eq!(notifier.count(Severity::Warning), 1);
    assert!(drain_events(&mut events).contains(&SyncEvent::PermanentFailure {
        key: EntityKey::new(EntityType::Note, "n1"),
        reason: "rejected: title too long".into(),
    }));

    // Never retried
    completed(service.flush_now().await);
    assert_eq!(remote.calls_for("n1").len(), 1);
}

#[tokio::test]
async fn newer_remote_version_wins_conflict() {
    let remote = Arc::new(MockRemoteStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap(),
    ));
    let service = CacheService::builder(Arc::clone(&remote))
        .with_clock(clock.clone())
        .with_online(false)
        .build()
        .unwrap();
    let mut events = service.subscribe();

    service
        .save(EntityType::Note, "n1", payload(json!({ "title": "X", "draft": true })))
        .await
        .unwrap();
    remote.fail_next(
        "n1",
        RemoteError::Conflict {
            remote: payload(json!({
                "id": "n1", "title": "Y", "updatedAt": "2026-01-01T11:00:00Z"
            })),
        },
    );
    clock.set(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap());
    service.set_online(true);
    let report = completed(service.flush_now().await);

    assert_eq!(report.resolved, 1);
    assert_eq!(service.queue_length(), 0);
    let stored = service.get(EntityType::Note, "n1").unwrap().unwrap();
    assert_eq!(stored.origin, Origin::Server);
    assert_eq!(stored.payload["title"], "Y");
    assert_eq!(stored.payload["draft"], true);
    assert_eq!(stored.payload["updatedAt"], json!(clock.now().to_rfc3339()));
    // What the cache calls confirmed is what the remote store holds
    assert_eq!(Some(stored.payload), remote.get(EntityType::Note, "n1"));

    let operations: Vec<_> = remote
        .calls_for("n1")
        .into_iter()
        .map(|call| call.operation)
        .collect();
    assert_eq!(operations, vec![Operation::Create, Operation::Update]);
    assert!(drain_events(&mut events).contains(&SyncEvent::ConflictResolved {
        key: EntityKey::new(EntityType::Note, "n1"),
        winner: ConflictWinner::Server,
    }));
}

#[tokio::test]
async fn newer_local_version_is_merged_and_pushed() {
    let remote = Arc::new(MockRemoteStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap(),
    ));
    let service = CacheService::builder(Arc::clone(&remote))
        .with_clock(clock)
        .build()
        .unwrap();
    remote.fail_next(
        "n1",
        RemoteError::Conflict {
            remote: payload(json!({
                "id": "n1", "title": "server", "projectId": "p7",
                "updatedAt": "2026-01-01T00:00:00Z"
            })),
        },
    );

    service
        .save(EntityType::Note, "n1", payload(json!({ "title": "mine" })))
        .await
        .unwrap();

    let pushed = remote.get(EntityType::Note, "n1").unwrap();
    assert_eq!(pushed["title"], "mine");
    assert_eq!(pushed["projectId"], "p7");

    let operations: Vec<_> = remote
        .calls_for("n1")
        .into_iter()
        .map(|call| call.operation)
        .collect();
    assert_eq!(operations, vec![Operation::Create, Operation::Update]);
    assert_eq!(service.queue_length(), 0);
}

#[tokio::test]
async fn queue_and_cache_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(MockRemoteStore::new());

    {
        let service = CacheService::builder(Arc::clone(&remote))
            .with_directory(dir.path())
            .with_online(false)
            .build()
            .unwrap();
        service.save(EntityType::Note, "n1", note("one")).await.unwrap();
        service.save(EntityType::Note, "n2", note("two")).await.unwrap();
        service.delete(EntityType::Note, "n2").await.unwrap();
        assert!(!service.sync_status().degraded);
    }

    let service = CacheService::builder(Arc::clone(&remote))
        .with_directory(dir.path())
        .build()
        .unwrap();

    assert_eq!(service.queue_length(), 2);
    let notes = service.load_all(EntityType::Note).unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, "n1");

    let report = completed(service.flush_now().await);
    assert_eq!(report.synced, 2);
    assert_eq!(remote.len(), 1);
}

#[tokio::test]
async fn unusable_directory_degrades_to_memory() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-directory");
    std::fs::write(&blocker, b"occupied").unwrap();

    let service = CacheService::builder(Arc::new(MockRemoteStore::new()))
        .with_directory(&blocker)
        .with_online(false)
        .build()
        .unwrap();

    assert!(service.sync_status().degraded);
    service.save(EntityType::Note, "n1", note("still works")).await.unwrap();
    assert_eq!(service.load_all(EntityType::Note).unwrap().len(), 1);
    assert_eq!(service.sync_status().queue_length, 1);
}

#[tokio::test]
async fn entries_are_scoped_to_identity() {
    let remote = Arc::new(MockRemoteStore::new());
    let identity = Arc::new(StaticIdentity::new(Some(Identity::new("user-a", None))));
    let service = CacheService::builder(Arc::clone(&remote))
        .with_identity(identity.clone())
        .build()
        .unwrap();

    service.save(EntityType::Note, "n1", note("private")).await.unwrap();
    assert_eq!(service.sync_status().cache_size, 1);

    identity.set(None);
    assert!(service.load_all(EntityType::Note).unwrap().is_empty());
    assert_eq!(service.sync_status().cache_size, 0);

    identity.set(Some(Identity::new("user-a", None)));
    let notes = service.load_all(EntityType::Note).unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].origin, Origin::Server);
}

#[tokio::test]
async fn retention_prunes_only_confirmed_entries() {
    let remote = Arc::new(MockRemoteStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap(),
    ));
    let service = CacheService::builder(Arc::clone(&remote))
        .with_config(SyncConfig::new().with_cache_retention(Duration::from_secs(3600)))
        .with_clock(clock.clone())
        .build()
        .unwrap();

    remote.fail_times("unsynced", RemoteError::Timeout, 3);
    service.save(EntityType::Note, "synced", note("a")).await.unwrap();
    service.save(EntityType::Note, "unsynced", note("b")).await.unwrap();

    clock.advance(chrono::Duration::hours(2));
    completed(service.flush_now().await);

    let ids: Vec<_> = service
        .load_all(EntityType::Note)
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(ids, vec!["unsynced"]);
}

#[tokio::test]
async fn overlapping_flushes_do_not_run_twice() {
    let remote = Arc::new(MockRemoteStore::new());
    let service = CacheService::builder(Arc::clone(&remote))
        .with_online(false)
        .build()
        .unwrap();
    service.save(EntityType::Note, "n1", note("x")).await.unwrap();
    service.set_online(true);
    remote.set_delay(Some(Duration::from_millis(50)));

    let (first, second) = tokio::join!(service.flush_now(), service.flush_now());

    let outcomes = [first, second];
    assert!(outcomes.contains(&FlushOutcome::AlreadyRunning));
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, FlushOutcome::Completed(r) if r.synced == 1)));
    assert_eq!(remote.calls().len(), 1);
}

#[tokio::test]
async fn clear_drops_cache_and_queue() {
    let service = CacheService::builder(Arc::new(MockRemoteStore::new()))
        .with_online(false)
        .build()
        .unwrap();
    service.save(EntityType::Note, "n1", note("x")).await.unwrap();
    service.save(EntityType::Tag, "t1", note("y")).await.unwrap();

    service.clear().unwrap();

    let status = service.sync_status();
    assert_eq!(status.queue_length, 0);
    assert_eq!(status.cache_size, 0);
    assert!(service.load_all(EntityType::Note).unwrap().is_empty());
}

#[tokio::test]
async fn worker_flushes_when_coming_online() {
    let remote = Arc::new(MockRemoteStore::new());
    let service = Arc::new(
        CacheService::builder(Arc::clone(&remote))
            .with_online(false)
            .build()
            .unwrap(),
    );
    service.save(EntityType::Note, "n1", note("a")).await.unwrap();
    service.save(EntityType::Note, "n2", note("b")).await.unwrap();

    let mut events = service.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (_tick_tx, tick_rx) = mpsc::unbounded_channel();
    let worker = SyncWorker::new(Arc::clone(&service), ChannelTicker(tick_rx), shutdown_rx);
    let handle = tokio::spawn(worker.run());

    service.set_online(true);
    let report = next_drain(&mut events).await;

    assert_eq!(report.synced, 2);
    assert_eq!(service.queue_length(), 0);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn worker_retries_on_timer_ticks() {
    let remote = Arc::new(MockRemoteStore::new());
    remote.set_connected(false);
    let service = Arc::new(CacheService::builder(Arc::clone(&remote)).build().unwrap());
    service.save(EntityType::Note, "n1", note("a")).await.unwrap();
    assert_eq!(service.queue_length(), 1);

    let mut events = service.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (tick_tx, tick_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(
        SyncWorker::new(Arc::clone(&service), ChannelTicker(tick_rx), shutdown_rx).run(),
    );

    // Startup pass while the remote is still unreachable
    let report = next_drain(&mut events).await;
    assert_eq!(report.retried, 1);

    remote.set_connected(true);
    tick_tx.send(()).unwrap();
    let report = next_drain(&mut events).await;
    assert_eq!(report.synced, 1);
    assert_eq!(service.queue_length(), 0);

    drop(shutdown_tx);
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn worker_retries_on_configured_interval() {
    let remote = Arc::new(MockRemoteStore::new());
    remote.set_connected(false);
    let interval = Duration::from_secs(10);
    let service = Arc::new(
        CacheService::builder(Arc::clone(&remote))
            .with_config(SyncConfig::new().with_flush_interval(interval))
            .build()
            .unwrap(),
    );
    service.save(EntityType::Note, "n1", note("a")).await.unwrap();

    let mut events = service.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let start = tokio::time::Instant::now();
    let handle = tokio::spawn(SyncWorker::with_interval(Arc::clone(&service), shutdown_rx).run());

    let report = next_drain(&mut events).await;
    assert_eq!(report.retried, 1);
    assert!(start.elapsed() < interval);

    remote.set_connected(true);
    let report = next_drain(&mut events).await;
    assert_eq!(report.synced, 1);
    let elapsed = start.elapsed();
    assert!(elapsed >= interval);
    assert!(elapsed < DEFAULT_FLUSH_INTERVAL);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

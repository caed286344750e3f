//! Loader behaviour against the in-memory log and failure-injecting stores.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::StoreError;
use beacon_pipeline::{
    DeadLetterKind, DeadLetterRecord, DeadLetterSink, Loader, LoaderConfig, LoaderError,
    LogProducer, MemoryLog,
};
use beacon_storage::{ColumnarStore, MemoryColumnarStore};
use beacon_test_utils::fixtures::wire_payload;
use beacon_test_utils::FlakyStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

const GROUP: &str = "event-consumers";

fn config(batch_size: usize, batch_interval: Duration) -> LoaderConfig {
    LoaderConfig {
        batch_size,
        batch_interval,
        poll_timeout: Duration::from_secs(1),
        insert_retry_attempts: 3,
        retry_backoff_base: Duration::from_secs(1),
        shutdown_grace: Duration::from_secs(30),
        ..LoaderConfig::default()
    }
}

type LoaderHandle = JoinHandle<Result<Arc<beacon_pipeline::LoaderMetrics>, LoaderError>>;

fn spawn_loader(
    log: &MemoryLog,
    store: Arc<dyn ColumnarStore>,
    config: LoaderConfig,
) -> (watch::Sender<bool>, LoaderHandle, Arc<beacon_pipeline::LoaderMetrics>) {
    let loader = Loader::new(
        Arc::new(log.consumer(config.consumer_group.clone(), config.topic.clone())),
        store,
        DeadLetterSink::new(Arc::new(log.clone()), config.dead_letter_topic.clone()),
        config,
    );
    let metrics = loader.metrics();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(loader.run(shutdown_rx));
    (shutdown_tx, handle, metrics)
}

async fn publish(log: &MemoryLog, distinct_id: &str, events: &[&str]) {
    for event in events {
        log.send("events", distinct_id.as_bytes(), &wire_payload(event, distinct_id))
            .await
            .unwrap();
    }
}

async fn dead_letters(log: &MemoryLog) -> Vec<DeadLetterRecord> {
    log.records("events_dlq")
        .await
        .into_iter()
        .map(|r| serde_json::from_slice(&r.payload).unwrap())
        .collect()
}

// ============================================================================
// FLUSH TRIGGERS
// ============================================================================

/// **Property: size trigger**
///
/// A full buffer flushes immediately, long before the interval.
#[tokio::test(start_paused = true)]
async fn test_flush_on_batch_size() {
    let log = MemoryLog::new(1);
    let store = Arc::new(MemoryColumnarStore::new());
    let (_shutdown, _handle, metrics) =
        spawn_loader(&log, store.clone(), config(3, Duration::from_secs(3600)));

    publish(&log, "u1", &["a", "b"]).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.len().await, 0);

    publish(&log, "u1", &["c"]).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.len().await, 3);
    assert_eq!(metrics.snapshot().batches_written, 1);
    assert_eq!(log.committed(GROUP, "events", 0).await, Some(3));
}

/// **Property: time trigger**
///
/// A partial buffer flushes once the interval elapses.
#[tokio::test(start_paused = true)]
async fn test_flush_on_interval() {
    let log = MemoryLog::new(1);
    let store = Arc::new(MemoryColumnarStore::new());
    let (_shutdown, _handle, _metrics) =
        spawn_loader(&log, store.clone(), config(1000, Duration::from_secs(5)));

    publish(&log, "u1", &["signup"]).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.len().await, 0);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(store.len().await, 1);
    assert_eq!(log.committed(GROUP, "events", 0).await, Some(1));
}

// ============================================================================
// RETRY AND DEAD-LETTER
// ============================================================================

/// **Property: retries absorb transient failures**
///
/// Failing `attempts - 1` times then succeeding writes the batch once and
/// dead-letters nothing.
#[tokio::test(start_paused = true)]
async fn test_retry_then_success_writes_without_dead_letters() {
    let log = MemoryLog::new(1);
    let store = Arc::new(FlakyStore::failing(2));
    let (_shutdown, _handle, metrics) =
        spawn_loader(&log, store.clone(), config(2, Duration::from_secs(3600)));

    publish(&log, "u1", &["a", "b"]).await;
    // Backoff is 1s then 2s.
    tokio::time::sleep(Duration::from_secs(4)).await;

    assert_eq!(store.insert_calls(), 3);
    assert_eq!(store.rows().await.len(), 2);
    assert!(dead_letters(&log).await.is_empty());
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.batches_written, 1);
    assert_eq!(snapshot.insert_retries, 2);
    assert_eq!(snapshot.dead_lettered, 0);
}

/// **Property: exhausted retries dead-letter every record**
///
/// One dead-letter per raw record, and the offsets still advance.
#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_dead_letter_each_record_and_commit() {
    let log = MemoryLog::new(1);
    let store = Arc::new(FlakyStore::always_failing());
    let (_shutdown, _handle, metrics) =
        spawn_loader(&log, store.clone(), config(3, Duration::from_secs(3600)));

    publish(&log, "u7", &["a", "b", "c"]).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(store.insert_calls(), 3);
    let dlq = dead_letters(&log).await;
    assert_eq!(dlq.len(), 3);
    assert!(dlq.iter().all(|d| d.error_kind == DeadLetterKind::InsertFailed));
    assert!(dlq.iter().all(|d| d.error_message == "insert retries exhausted"));
    assert_eq!(dlq[0].raw["event"], "a");
    assert_eq!(log.committed(GROUP, "events", 0).await, Some(3));
    assert_eq!(metrics.snapshot().insert_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_store_error_skips_remaining_attempts() {
    let log = MemoryLog::new(1);
    let store = Arc::new(FlakyStore::failing_with(
        u32::MAX,
        StoreError::Rejected {
            status: 400,
            reason: "bad column".to_string(),
        },
    ));
    let (_shutdown, _handle, metrics) =
        spawn_loader(&log, store.clone(), config(1, Duration::from_secs(3600)));

    publish(&log, "u1", &["a"]).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(store.insert_calls(), 1);
    assert_eq!(dead_letters(&log).await.len(), 1);
    assert_eq!(metrics.snapshot().insert_retries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_record_dead_lettered_as_parse_error() {
    let log = MemoryLog::new(1);
    let store = Arc::new(MemoryColumnarStore::new());
    let (_shutdown, _handle, metrics) =
        spawn_loader(&log, store.clone(), config(1000, Duration::from_secs(5)));

    log.send("events", b"u1", br#"{"distinct_id":"u1"}"#)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let dlq = dead_letters(&log).await;
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].error_kind, DeadLetterKind::ParseError);
    assert_eq!(dlq[0].error_message, "required field missing: event");
    assert_eq!(log.records("events_dlq").await[0].key.as_deref(), Some(&b"u1"[..]));
    assert_eq!(log.committed(GROUP, "events", 0).await, Some(1));
    assert_eq!(metrics.snapshot().parse_errors, 1);
    assert_eq!(store.len().await, 0);
}

// ============================================================================
// SHUTDOWN AND FAILURE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_buffer() {
    let log = MemoryLog::new(2);
    let store = Arc::new(MemoryColumnarStore::new());
    let (shutdown, handle, _metrics) =
        spawn_loader(&log, store.clone(), config(1000, Duration::from_secs(3600)));

    publish(&log, "u1", &["a", "b"]).await;
    publish(&log, "u2", &["c"]).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.len().await, 0);

    shutdown.send(true).unwrap();
    let metrics = handle.await.unwrap().unwrap();
    assert_eq!(store.len().await, 3);
    assert_eq!(metrics.snapshot().rows_written, 3);
}

#[tokio::test(start_paused = true)]
async fn test_broker_loss_stops_loader() {
    let log = MemoryLog::new(1);
    let store = Arc::new(MemoryColumnarStore::new());
    let (_shutdown, handle, _metrics) =
        spawn_loader(&log, store, config(1000, Duration::from_secs(5)));

    log.set_unavailable(true);
    let result = handle.await.unwrap();
    assert!(matches!(result, Err(LoaderError::Broker(_))));
}

/// One loader batch of three events for one subject becomes three rows.
#[tokio::test(start_paused = true)]
async fn test_single_subject_batch_produces_rows_with_same_subject() {
    let log = MemoryLog::default();
    let store = Arc::new(MemoryColumnarStore::new());
    let (_shutdown, _handle, metrics) =
        spawn_loader(&log, store.clone(), config(3, Duration::from_secs(3600)));

    publish(&log, "same-user", &["view", "click", "buy"]).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let rows = store.rows().await;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.distinct_id == "same-user"));
    let events: Vec<&str> = rows.iter().map(|r| r.event.as_str()).collect();
    assert_eq!(events, vec!["view", "click", "buy"]);
    assert_eq!(metrics.snapshot().batches_written, 1);
}

//! Batch Loader
//!
//! Moves events from the log into the columnar store. One sequential loop per
//! process runs this cycle:
//!
//! ```text
//! WAIT_FOR_RECORD -> ACCUMULATE -> FLUSH_ON_SIZE | FLUSH_ON_TIME -> WRITE
//!     -> COMMIT | DEAD_LETTER_AND_COMMIT -> WAIT_FOR_RECORD
//! ```
//!
//! Offsets are committed only after the covered records were written to the
//! store or handed to the dead-letter topic. A crash before the commit means
//! re-delivery, so rows can be duplicated but never silently lost.
//!
//! - Records that cannot become rows are dead-lettered as `parse_error` right
//!   away and never buffered.
//! - A batch write is attempted `insert_retry_attempts` times with
//!   exponential backoff. Terminal store errors end the attempts early.
//! - A batch that cannot be written is dead-lettered record by record as
//!   `insert_failed` and its offsets committed anyway.
//! - Losing the broker (poll, commit or dead-letter publish) stops the loop.

pub mod buffer;
pub mod config;
pub mod metrics;
pub mod transform;

use std::sync::Arc;

use beacon_core::{EventRow, StoreError};
use beacon_storage::ColumnarStore;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::dead_letter::{DeadLetterKind, DeadLetterRecord, DeadLetterSink};
use crate::error::LoaderError;
use crate::log::{LogConsumer, LogRecord};

pub use buffer::{Batch, BufferedRecord, LoaderBuffer};
pub use config::LoaderConfig;
pub use metrics::{LoaderMetrics, LoaderSnapshot};
pub use transform::{row_from_object, row_from_payload};

const INSERT_EXHAUSTED: &str = "insert retries exhausted";
const INSERT_EXHAUSTED_ON_SHUTDOWN: &str = "insert retries exhausted (shutdown)";

// ============================================================================
// STATE MACHINE
// ============================================================================

/// Where the loop is within one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    WaitForRecord,
    Accumulate,
    FlushOnSize,
    FlushOnTime,
    Write,
    Commit,
    DeadLetterAndCommit,
    Draining,
    Stopped,
}

/// What caused a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Time,
    Shutdown,
}

impl FlushTrigger {
    fn as_str(self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Time => "time",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

/// How a flushed batch left the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Written { rows: usize },
    DeadLettered { records: usize },
}

// ============================================================================
// LOADER
// ============================================================================

/// Consumes the events topic into a [`ColumnarStore`].
pub struct Loader {
    consumer: Arc<dyn LogConsumer>,
    store: Arc<dyn ColumnarStore>,
    dead_letters: DeadLetterSink,
    config: LoaderConfig,
    metrics: Arc<LoaderMetrics>,
    buffer: LoaderBuffer,
    last_flush: Instant,
    state: LoaderState,
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("config", &self.config)
            .field("buffered", &self.buffer.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Loader {
    pub fn new(
        consumer: Arc<dyn LogConsumer>,
        store: Arc<dyn ColumnarStore>,
        dead_letters: DeadLetterSink,
        config: LoaderConfig,
    ) -> Self {
        Self {
            consumer,
            store,
            dead_letters,
            config,
            metrics: Arc::new(LoaderMetrics::new()),
            buffer: LoaderBuffer::new(),
            last_flush: Instant::now(),
            state: LoaderState::WaitForRecord,
        }
    }

    /// Shared handle to the loader's counters.
    pub fn metrics(&self) -> Arc<LoaderMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    fn transition(&mut self, next: LoaderState) {
        trace!(from = ?self.state, to = ?next, "Loader state change");
        self.state = next;
    }

    /// Run until `shutdown_rx` turns true (or its sender is dropped), then
    /// drain the buffer within the shutdown grace period.
    pub async fn run(
        mut self,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Arc<LoaderMetrics>, LoaderError> {
        info!(
            topic = %self.config.topic,
            dead_letter_topic = %self.dead_letters.topic(),
            batch_size = self.config.batch_size,
            batch_interval_ms = self.config.batch_interval.as_millis() as u64,
            insert_retry_attempts = self.config.insert_retry_attempts,
            "Loader started"
        );
        self.last_flush = Instant::now();

        let result = self.cycle(&mut shutdown_rx).await;
        let result = match result {
            Ok(()) => self.drain().await,
            Err(err) => {
                error!(error = %err, buffered = self.buffer.len(), "Loader stopping on broker failure");
                Err(err)
            }
        };
        self.transition(LoaderState::Stopped);

        let snapshot = self.metrics.snapshot();
        info!(
            messages_consumed = snapshot.messages_consumed,
            parse_errors = snapshot.parse_errors,
            batches_written = snapshot.batches_written,
            rows_written = snapshot.rows_written,
            insert_retries = snapshot.insert_retries,
            insert_failures = snapshot.insert_failures,
            dead_lettered = snapshot.dead_lettered,
            "Loader completed"
        );

        result.map(|()| self.metrics)
    }

    async fn cycle(&mut self, shutdown_rx: &mut watch::Receiver<bool>) -> Result<(), LoaderError> {
        loop {
            if *shutdown_rx.borrow() {
                return Ok(());
            }
            self.transition(LoaderState::WaitForRecord);

            let consumer = Arc::clone(&self.consumer);
            let polled = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    continue;
                }
                polled = consumer.poll(self.config.poll_timeout) => polled?,
            };

            if let Some(record) = polled {
                self.transition(LoaderState::Accumulate);
                self.accept(record).await?;
            }

            if let Some(trigger) = self.flush_trigger() {
                self.flush(trigger).await?;
            }
        }
    }

    /// Transform one record into the buffer, or dead-letter it.
    async fn accept(&mut self, record: LogRecord) -> Result<(), LoaderError> {
        match transform::row_from_payload(&record.payload, Utc::now()) {
            Ok(row) => {
                LoaderMetrics::incr(&self.metrics.messages_consumed, 1);
                self.buffer.push(&record, row);
                Ok(())
            }
            Err(err) => {
                LoaderMetrics::incr(&self.metrics.parse_errors, 1);
                warn!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %err,
                    "Record failed to parse"
                );
                self.dead_letter(&record.payload, DeadLetterKind::ParseError, &err.to_string())
                    .await?;

                // Committing past an earlier buffered record of the same
                // partition would skip it on restart.
                let offset = record.next_offset();
                if self.buffer.holds_partition(&offset.topic, offset.partition) {
                    self.buffer.advance(offset);
                } else {
                    self.transition(LoaderState::Commit);
                    self.consumer.commit(&[offset]).await?;
                }
                Ok(())
            }
        }
    }

    fn flush_trigger(&mut self) -> Option<FlushTrigger> {
        let interval_elapsed = self.last_flush.elapsed() >= self.config.batch_interval;
        if self.buffer.is_empty() {
            if interval_elapsed {
                self.last_flush = Instant::now();
            }
            return None;
        }
        if self.buffer.len() >= self.config.batch_size {
            Some(FlushTrigger::Size)
        } else if interval_elapsed {
            Some(FlushTrigger::Time)
        } else {
            None
        }
    }

    /// Write the buffer (or dead-letter it) and commit its offsets.
    async fn flush(&mut self, trigger: FlushTrigger) -> Result<FlushOutcome, LoaderError> {
        match trigger {
            FlushTrigger::Size => self.transition(LoaderState::FlushOnSize),
            FlushTrigger::Time => self.transition(LoaderState::FlushOnTime),
            FlushTrigger::Shutdown => self.transition(LoaderState::Draining),
        }
        let batch = self.buffer.take();
        let started = Instant::now();

        self.transition(LoaderState::Write);
        let rows = batch.rows();
        let outcome = match self.write_with_retries(&rows).await {
            Ok(()) => {
                LoaderMetrics::incr(&self.metrics.batches_written, 1);
                LoaderMetrics::incr(&self.metrics.rows_written, rows.len() as u64);
                info!(
                    count = rows.len(),
                    trigger = trigger.as_str(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Batch inserted"
                );
                self.transition(LoaderState::Commit);
                FlushOutcome::Written { rows: rows.len() }
            }
            Err(err) => {
                LoaderMetrics::incr(&self.metrics.insert_failures, 1);
                self.transition(LoaderState::DeadLetterAndCommit);
                let message = if trigger == FlushTrigger::Shutdown {
                    INSERT_EXHAUSTED_ON_SHUTDOWN
                } else {
                    INSERT_EXHAUSTED
                };
                for record in &batch.records {
                    self.dead_letter(&record.raw, DeadLetterKind::InsertFailed, message)
                        .await?;
                }
                error!(
                    count = batch.len(),
                    trigger = trigger.as_str(),
                    error = %err,
                    "Batch sent to dead-letter topic"
                );
                FlushOutcome::DeadLettered {
                    records: batch.len(),
                }
            }
        };

        self.consumer.commit(&batch.offsets).await?;
        self.last_flush = Instant::now();
        Ok(outcome)
    }

    async fn write_with_retries(&self, rows: &[EventRow]) -> Result<(), StoreError> {
        let attempts = self.config.insert_retry_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.store.insert_batch(rows).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    let backoff = self.config.backoff(attempt);
                    LoaderMetrics::incr(&self.metrics.insert_retries, 1);
                    warn!(
                        attempt = attempt + 1,
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "Insert failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(attempt = attempt + 1, error = %err, "Insert failed");
                    return Err(err);
                }
            }
        }
    }

    async fn dead_letter(
        &self,
        raw: &[u8],
        kind: DeadLetterKind,
        message: &str,
    ) -> Result<(), LoaderError> {
        let record = DeadLetterRecord::new(raw, kind, message, Utc::now());
        self.dead_letters
            .send(&record)
            .await
            .map_err(LoaderError::DeadLetter)?;
        LoaderMetrics::incr(&self.metrics.dead_lettered, 1);
        Ok(())
    }

    /// Flush what is buffered, bounded by the shutdown grace period.
    async fn drain(&mut self) -> Result<(), LoaderError> {
        self.transition(LoaderState::Draining);
        if self.buffer.is_empty() {
            return Ok(());
        }
        let buffered = self.buffer.len();
        let grace = self.config.shutdown_grace;
        match tokio::time::timeout(grace, self.flush(FlushTrigger::Shutdown)).await {
            Ok(outcome) => {
                debug!(?outcome, "Loader drained");
                outcome.map(|_| ())
            }
            Err(_) => {
                warn!(
                    buffered,
                    grace_ms = grace.as_millis() as u64,
                    "Shutdown grace expired, uncommitted records will be re-delivered"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogProducer, MemoryLog};
    use beacon_storage::MemoryColumnarStore;
    use std::time::Duration;

    fn loader(log: &MemoryLog, store: Arc<MemoryColumnarStore>, config: LoaderConfig) -> Loader {
        Loader::new(
            Arc::new(log.consumer(config.consumer_group.clone(), config.topic.clone())),
            store,
            DeadLetterSink::new(Arc::new(log.clone()), config.dead_letter_topic.clone()),
            config,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_error_commits_individually_when_partition_idle() {
        let log = MemoryLog::new(1);
        let store = Arc::new(MemoryColumnarStore::new());
        let config = LoaderConfig::default();
        let mut loader = loader(&log, store, config);

        log.send("events", b"k", b"not json").await.unwrap();
        let record = loader
            .consumer
            .poll(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        loader.accept(record).await.unwrap();

        assert!(loader.buffer.is_empty());
        assert_eq!(log.committed("event-consumers", "events", 0).await, Some(1));
        assert_eq!(log.records("events_dlq").await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_error_behind_buffered_record_waits_for_batch() {
        let log = MemoryLog::new(1);
        let store = Arc::new(MemoryColumnarStore::new());
        let mut loader = loader(&log, store, LoaderConfig::default());

        log.send("events", b"u1", br#"{"event":"a","distinct_id":"u1"}"#)
            .await
            .unwrap();
        log.send("events", b"u1", b"[]").await.unwrap();
        for _ in 0..2 {
            let record = loader
                .consumer
                .poll(Duration::from_millis(10))
                .await
                .unwrap()
                .unwrap();
            loader.accept(record).await.unwrap();
        }

        assert_eq!(loader.buffer.len(), 1);
        assert_eq!(log.committed("event-consumers", "events", 0).await, None);

        let outcome = loader.flush(FlushTrigger::Time).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Written { rows: 1 });
        assert_eq!(log.committed("event-consumers", "events", 0).await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_trigger_resets_clock_when_idle() {
        let log = MemoryLog::new(1);
        let store = Arc::new(MemoryColumnarStore::new());
        let config = LoaderConfig {
            batch_interval: Duration::from_secs(5),
            ..LoaderConfig::default()
        };
        let mut loader = loader(&log, store, config);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(loader.flush_trigger(), None);
        assert!(loader.last_flush.elapsed() < Duration::from_secs(1));
    }
}

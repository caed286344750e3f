//! Loader counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for loader activity since startup.
#[derive(Debug, Default)]
pub struct LoaderMetrics {
    /// Records that became rows and entered the buffer
    pub messages_consumed: AtomicU64,

    /// Records that could not be turned into rows
    pub parse_errors: AtomicU64,

    /// Batches durably written to the store
    pub batches_written: AtomicU64,

    /// Rows durably written to the store
    pub rows_written: AtomicU64,

    /// Insert attempts that failed and were retried
    pub insert_retries: AtomicU64,

    /// Batches that exhausted their insert attempts
    pub insert_failures: AtomicU64,

    /// Records published to the dead-letter topic
    pub dead_lettered: AtomicU64,
}

impl LoaderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LoaderSnapshot {
        LoaderSnapshot {
            messages_consumed: self.messages_consumed.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            insert_retries: self.insert_retries.load(Ordering::Relaxed),
            insert_failures: self.insert_failures.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of loader metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderSnapshot {
    pub messages_consumed: u64,
    pub parse_errors: u64,
    pub batches_written: u64,
    pub rows_written: u64,
    pub insert_retries: u64,
    pub insert_failures: u64,
    pub dead_lettered: u64,
}

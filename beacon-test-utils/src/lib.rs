//! Beacon Test Utilities
//!
//! Shared test infrastructure for the beacon workspace:
//! - Proptest generators for events, rows and funnel inputs
//! - Failure-injecting store wrappers
//! - Fixtures for common scenarios
//! - Assertions for aggregation invariants

pub use beacon_core::{
    CanonicalEvent, DateRange, EventRow, FunnelMode, FunnelQuery, Interval, StoreError,
    StoreResult, Timestamp, TrendQuery, TrendResult,
};
pub use beacon_storage::{ColumnarStore, MemoryColumnarStore};

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use beacon_core::{RecentEventsQuery, StoredEvent};

// ============================================================================
// FAILURE-INJECTING STORE
// ============================================================================

/// A [`MemoryColumnarStore`] whose first `n` inserts fail with a chosen error.
///
/// Queries always go to the inner store.
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<MemoryColumnarStore>,
    failures_left: AtomicU32,
    error: StoreError,
    insert_calls: AtomicU64,
}

impl FlakyStore {
    /// Fail the next `failures` inserts with a retryable error.
    pub fn failing(failures: u32) -> Self {
        Self::failing_with(failures, StoreError::unavailable("injected outage"))
    }

    pub fn failing_with(failures: u32, error: StoreError) -> Self {
        Self {
            inner: Arc::new(MemoryColumnarStore::new()),
            failures_left: AtomicU32::new(failures),
            error,
            insert_calls: AtomicU64::new(0),
        }
    }

    /// Every insert fails.
    pub fn always_failing() -> Self {
        Self::failing(u32::MAX)
    }

    pub fn inner(&self) -> Arc<MemoryColumnarStore> {
        Arc::clone(&self.inner)
    }

    /// Insert attempts seen, failed ones included.
    pub fn insert_calls(&self) -> u64 {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub async fn rows(&self) -> Vec<EventRow> {
        self.inner.rows().await
    }
}

#[async_trait]
impl ColumnarStore for FlakyStore {
    async fn insert_batch(&self, rows: &[EventRow]) -> StoreResult<()> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(self.error.clone());
        }
        self.inner.insert_batch(rows).await
    }

    async fn trend(&self, query: &TrendQuery) -> StoreResult<TrendResult> {
        self.inner.trend(query).await
    }

    async fn funnel(&self, query: &FunnelQuery) -> StoreResult<Vec<u64>> {
        self.inner.funnel(query).await
    }

    async fn recent(&self, query: &RecentEventsQuery) -> StoreResult<Vec<StoredEvent>> {
        self.inner.recent(query).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for beacon inputs.

    use super::*;
    use chrono::{Duration, NaiveDate};
    use proptest::prelude::*;
    use serde_json::{Map, Value};
    use uuid::Uuid;

    /// Small event vocabulary so generated funnels actually match rows.
    pub const EVENT_NAMES: &[&str] = &["visit", "signup", "activate", "purchase", "churn"];

    pub fn arb_event_name() -> impl Strategy<Value = String> {
        prop::sample::select(EVENT_NAMES).prop_map(str::to_string)
    }

    pub fn arb_distinct_id() -> impl Strategy<Value = String> {
        (0u8..12).prop_map(|n| format!("user-{}", n))
    }

    /// A timestamp within `[range.from, range.to + 3 days)`, so some rows
    /// fall outside the range.
    pub fn arb_timestamp_near(range: DateRange) -> impl Strategy<Value = Timestamp> {
        let span = (range.to - range.from).num_seconds() + 3 * 86_400;
        (-86_400i64..span).prop_map(move |offset| range.start() + Duration::seconds(offset))
    }

    pub fn arb_event_row(project_id: &'static str, range: DateRange) -> impl Strategy<Value = EventRow> {
        (arb_event_name(), arb_distinct_id(), arb_timestamp_near(range)).prop_map(
            move |(event, distinct_id, timestamp)| EventRow {
                timestamp,
                uuid: Uuid::now_v7(),
                event,
                distinct_id,
                project_id: project_id.to_string(),
                properties: "{}".to_string(),
                lib: None,
                lib_version: None,
                device_id: None,
            },
        )
    }

    pub fn arb_rows(
        project_id: &'static str,
        range: DateRange,
        max: usize,
    ) -> impl Strategy<Value = Vec<EventRow>> {
        prop::collection::vec(arb_event_row(project_id, range), 0..max)
    }

    /// Between 2 and 5 steps; names may repeat.
    pub fn arb_funnel_steps() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(arb_event_name(), 2..=5)
    }

    pub fn arb_date_range() -> impl Strategy<Value = DateRange> {
        (0i64..300, 0i64..30).prop_map(|(start, len)| {
            let base = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap_or(NaiveDate::MIN);
            let from = base + Duration::days(start);
            DateRange {
                from,
                to: from + Duration::days(len),
            }
        })
    }

    pub fn arb_interval() -> impl Strategy<Value = Interval> {
        prop_oneof![Just(Interval::Day), Just(Interval::Week), Just(Interval::Month)]
    }

    /// Flat properties with exactly `keys` entries.
    pub fn arb_flat_properties(keys: usize) -> impl Strategy<Value = Map<String, Value>> {
        prop::collection::vec(any::<i32>(), keys).prop_map(|values| {
            values
                .into_iter()
                .enumerate()
                .map(|(i, v)| (format!("k{}", i), Value::from(v)))
                .collect()
        })
    }

    /// Properties nested to exactly `depth` (an empty map is depth 1).
    pub fn arb_nested_properties(depth: usize) -> impl Strategy<Value = Map<String, Value>> {
        "[a-z]{1,8}".prop_map(move |leaf| {
            let mut current = Map::new();
            current.insert("leaf".to_string(), Value::String(leaf));
            for level in 1..depth {
                let mut outer = Map::new();
                outer.insert(format!("level{}", level), Value::Object(current));
                current = outer;
            }
            current
        })
    }

    /// Capture body for one well-formed event.
    pub fn arb_capture_event() -> impl Strategy<Value = Value> {
        (arb_event_name(), arb_distinct_id(), arb_flat_properties(3)).prop_map(
            |(event, distinct_id, properties)| {
                serde_json::json!({
                    "event": event,
                    "distinct_id": distinct_id,
                    "properties": properties,
                })
            },
        )
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values for common scenarios.

    use super::*;
    use chrono::{NaiveDate, Utc};
    use serde_json::Value;
    use uuid::Uuid;

    pub const TEST_PROJECT: &str = "default";

    pub fn event_row(event: &str, distinct_id: &str, timestamp: Timestamp) -> EventRow {
        EventRow {
            timestamp,
            uuid: Uuid::now_v7(),
            event: event.to_string(),
            distinct_id: distinct_id.to_string(),
            project_id: TEST_PROJECT.to_string(),
            properties: "{}".to_string(),
            lib: None,
            lib_version: None,
            device_id: None,
        }
    }

    /// `[today, today]` in UTC.
    pub fn today_range() -> DateRange {
        let today = Utc::now().date_naive();
        DateRange {
            from: today,
            to: today,
        }
    }

    pub fn october_2026() -> DateRange {
        DateRange {
            from: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap_or(NaiveDate::MIN),
            to: NaiveDate::from_ymd_opt(2026, 10, 31).unwrap_or(NaiveDate::MAX),
        }
    }

    pub fn capture_payload(event: &str, distinct_id: &str) -> Value {
        serde_json::json!({
            "event": event,
            "distinct_id": distinct_id,
            "project_id": TEST_PROJECT,
        })
    }

    pub fn batch_payload(distinct_id: &str, events: &[&str]) -> Value {
        let batch: Vec<Value> = events
            .iter()
            .map(|event| capture_payload(event, distinct_id))
            .collect();
        serde_json::json!({ "batch": batch })
    }

    /// Wire bytes of a minimal event as the capture service publishes it.
    pub fn wire_payload(event: &str, distinct_id: &str) -> Vec<u8> {
        capture_payload(event, distinct_id).to_string().into_bytes()
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for aggregation invariants.

    #[track_caller]
    pub fn assert_non_increasing(counts: &[u64]) {
        for pair in counts.windows(2) {
            assert!(
                pair[0] >= pair[1],
                "Expected non-increasing counts, got {:?}",
                counts
            );
        }
    }

    #[track_caller]
    pub fn assert_pointwise_le(lower: &[u64], upper: &[u64]) {
        assert_eq!(lower.len(), upper.len(), "Count vectors differ in length");
        for (i, (l, u)) in lower.iter().zip(upper).enumerate() {
            assert!(l <= u, "Step {}: {} > {} ({:?} vs {:?})", i, l, u, lower, upper);
        }
    }

    #[track_caller]
    pub fn assert_sorted_labels(labels: &[String]) {
        let mut sorted = labels.to_vec();
        sorted.sort();
        assert_eq!(labels, sorted.as_slice(), "Bucket labels out of order");
    }
}

//! In-memory columnar store.

use ::async_trait::async_trait;
use beacon_core::{
    EventRow, FunnelMode, FunnelQuery, RecentEventsQuery, StoreResult, StoredEvent, TrendQuery,
    TrendResult,
};
use tokio::sync::RwLock;

use crate::aggregate;
use crate::store::ColumnarStore;

/// Rows held in insertion order behind an async lock.
#[derive(Debug, Default)]
pub struct MemoryColumnarStore {
    rows: RwLock<Vec<EventRow>>,
}

impl MemoryColumnarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored row.
    pub async fn rows(&self) -> Vec<EventRow> {
        self.rows.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl ColumnarStore for MemoryColumnarStore {
    async fn insert_batch(&self, rows: &[EventRow]) -> StoreResult<()> {
        self.rows.write().await.extend_from_slice(rows);
        Ok(())
    }

    async fn trend(&self, query: &TrendQuery) -> StoreResult<TrendResult> {
        let rows = self.rows.read().await;
        Ok(aggregate::trend_buckets(
            rows.iter(),
            &query.project_id,
            &query.event,
            &query.range,
            query.interval,
        ))
    }

    async fn funnel(&self, query: &FunnelQuery) -> StoreResult<Vec<u64>> {
        let rows = self.rows.read().await;
        Ok(match query.mode {
            FunnelMode::Simple => aggregate::simple_funnel_counts(
                rows.iter(),
                &query.project_id,
                &query.steps,
                &query.range,
            ),
            FunnelMode::Strict => aggregate::strict_funnel_counts(
                rows.iter(),
                &query.project_id,
                &query.steps,
                &query.range,
                query.conversion_window_days,
            ),
        })
    }

    async fn recent(&self, query: &RecentEventsQuery) -> StoreResult<Vec<StoredEvent>> {
        let rows = self.rows.read().await;
        let mut matching: Vec<&EventRow> = rows
            .iter()
            .filter(|r| r.project_id == query.project_id)
            .collect();
        // Stable sort keeps later inserts first among equal timestamps after reverse.
        matching.sort_by_key(|r| r.timestamp);
        Ok(matching
            .into_iter()
            .rev()
            .take(query.limit)
            .map(StoredEvent::from)
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{new_event_id, DateRange, Interval};
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    fn row(event: &str, minutes: i64) -> EventRow {
        EventRow {
            timestamp: Utc.with_ymd_and_hms(2026, 10, 15, 0, 0, 0).unwrap()
                + Duration::minutes(minutes),
            uuid: new_event_id(),
            event: event.to_string(),
            distinct_id: "u1".to_string(),
            project_id: "default".to_string(),
            properties: r#"{"plan":"pro"}"#.to_string(),
            lib: None,
            lib_version: None,
            device_id: None,
        }
    }

    #[tokio::test]
    async fn test_insert_then_trend() {
        let store = MemoryColumnarStore::new();
        store
            .insert_batch(&[row("signup", 0), row("signup", 5)])
            .await
            .unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let result = store
            .trend(&TrendQuery {
                project_id: "default".to_string(),
                event: "signup".to_string(),
                range: DateRange::new(day, day).unwrap(),
                interval: Interval::Day,
            })
            .await
            .unwrap();
        assert_eq!(result.series, vec![2]);
        assert_eq!(result.labels, vec!["2026-10-15"]);
    }

    #[tokio::test]
    async fn test_recent_orders_newest_first_and_limits() {
        let store = MemoryColumnarStore::new();
        store
            .insert_batch(&[row("a", 1), row("b", 3), row("c", 2)])
            .await
            .unwrap();
        let events = store
            .recent(&RecentEventsQuery::new("default", Some(2)))
            .await
            .unwrap();
        let names: Vec<_> = events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert_eq!(events[0].properties["plan"], "pro");
    }
}

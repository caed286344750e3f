//! Aggregation query requests and results

use chrono::{Datelike, Days, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::event::EventRow;
use crate::Timestamp;

pub const MIN_FUNNEL_STEPS: usize = 2;
pub const MAX_FUNNEL_STEPS: usize = 20;
pub const DEFAULT_CONVERSION_WINDOW_DAYS: u32 = 30;
pub const MAX_CONVERSION_WINDOW_DAYS: u32 = 365;
pub const DEFAULT_RECENT_LIMIT: usize = 100;
pub const MAX_RECENT_LIMIT: usize = 500;

// ============================================================================
// TIME BUCKETING
// ============================================================================

/// Trend bucket granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    #[default]
    Day,
    Week,
    Month,
}

impl Interval {
    /// Parse a granularity name. Unknown values fall back to `Day`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "week" => Interval::Week,
            "month" => Interval::Month,
            _ => Interval::Day,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
        }
    }

    /// First day of the bucket containing `date`. Weeks start on Monday.
    pub fn bucket_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Interval::Day => date,
            Interval::Week => date - Days::new(u64::from(date.weekday().num_days_from_monday())),
            Interval::Month => date.with_day(1).unwrap_or(date),
        }
    }
}

/// Inclusive calendar date range, evaluated as `[from 00:00, to + 1 day 00:00)` UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, ValidationError> {
        if from > to {
            return Err(ValidationError::message(format!(
                "date_from ({}) must not be after date_to ({})",
                from, to
            )));
        }
        Ok(Self { from, to })
    }

    /// Parse `YYYY-MM-DD` bounds.
    pub fn parse(from: &str, to: &str) -> Result<Self, ValidationError> {
        let parse = |field: &str, raw: &str| {
            NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
                ValidationError::from_fields(vec![crate::FieldError::new(
                    field,
                    "must be a date in YYYY-MM-DD format",
                )])
            })
        };
        Self::new(parse("date_from", from)?, parse("date_to", to)?)
    }

    pub fn start(&self) -> Timestamp {
        self.from.and_time(NaiveTime::MIN).and_utc()
    }

    /// Exclusive upper bound: midnight after `to`.
    pub fn end_exclusive(&self) -> Timestamp {
        let next = self.to.checked_add_days(Days::new(1)).unwrap_or(self.to);
        next.and_time(NaiveTime::MIN).and_utc()
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start() && ts < self.end_exclusive()
    }
}

// ============================================================================
// TREND
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendQuery {
    pub project_id: String,
    pub event: String,
    pub range: DateRange,
    pub interval: Interval,
}

/// Parallel arrays: `series[i]` is the count for the bucket labelled `labels[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TrendResult {
    pub series: Vec<u64>,
    pub labels: Vec<String>,
}

impl TrendResult {
    pub fn total(&self) -> u64 {
        self.series.iter().sum()
    }
}

// ============================================================================
// FUNNEL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum FunnelMode {
    /// Independent distinct-subject count per step.
    Simple,
    /// Ordered first occurrences within a conversion window.
    Strict,
}

impl FunnelMode {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            FunnelMode::Strict
        } else {
            FunnelMode::Simple
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunnelQuery {
    pub project_id: String,
    pub steps: Vec<String>,
    pub range: DateRange,
    pub mode: FunnelMode,
    /// Only meaningful in strict mode.
    pub conversion_window_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FunnelStep {
    /// 1-based position in the funnel.
    pub step: usize,
    pub event: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FunnelResult {
    pub steps: Vec<FunnelStep>,
    pub mode: FunnelMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_window_days: Option<u32>,
}

impl FunnelResult {
    /// Pair step names with counts.
    pub fn from_counts(
        steps: &[String],
        counts: &[u64],
        mode: FunnelMode,
        conversion_window_days: u32,
    ) -> Self {
        let steps = steps
            .iter()
            .zip(counts.iter().copied().chain(std::iter::repeat(0)))
            .enumerate()
            .map(|(idx, (event, count))| FunnelStep {
                step: idx + 1,
                event: event.clone(),
                count,
            })
            .collect();
        Self {
            steps,
            mode,
            conversion_window_days: (mode == FunnelMode::Strict).then_some(conversion_window_days),
        }
    }

    pub fn counts(&self) -> Vec<u64> {
        self.steps.iter().map(|s| s.count).collect()
    }
}

/// Clamp a requested conversion window to `1..=365` days; absent means 30.
pub fn clamp_conversion_window(days: Option<i64>) -> u32 {
    match days {
        None => DEFAULT_CONVERSION_WINDOW_DAYS,
        Some(d) => d.clamp(1, i64::from(MAX_CONVERSION_WINDOW_DAYS)) as u32,
    }
}

// ============================================================================
// RECENT EVENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentEventsQuery {
    pub project_id: String,
    pub limit: usize,
}

impl RecentEventsQuery {
    /// Limit defaults to 100 and is capped at 500.
    pub fn new(project_id: impl Into<String>, limit: Option<usize>) -> Self {
        Self {
            project_id: project_id.into(),
            limit: limit.unwrap_or(DEFAULT_RECENT_LIMIT).clamp(1, MAX_RECENT_LIMIT),
        }
    }
}

/// An event as read back from the columnar store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StoredEvent {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = DateTime))]
    pub timestamp: Timestamp,
    pub uuid: Uuid,
    pub event: String,
    pub distinct_id: String,
    pub project_id: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub properties: Value,
    #[serde(rename = "$lib")]
    pub lib: Option<String>,
    #[serde(rename = "$lib_version")]
    pub lib_version: Option<String>,
    #[serde(rename = "$device_id")]
    pub device_id: Option<String>,
}

impl From<&EventRow> for StoredEvent {
    fn from(row: &EventRow) -> Self {
        Self {
            timestamp: row.timestamp,
            uuid: row.uuid,
            event: row.event.clone(),
            distinct_id: row.distinct_id.clone(),
            project_id: row.project_id.clone(),
            properties: serde_json::from_str(&row.properties)
                .unwrap_or_else(|_| Value::Object(Default::default())),
            lib: row.lib.clone(),
            lib_version: row.lib_version.clone(),
            device_id: row.device_id.clone(),
        }
    }
}

// ============================================================================
// CACHEABLE / ASYNC AGGREGATIONS
// ============================================================================

/// An aggregation that can be cached or run off the request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationQuery {
    Trend(TrendQuery),
    Funnel(FunnelQuery),
}

impl AggregationQuery {
    pub fn query_type(&self) -> &'static str {
        match self {
            AggregationQuery::Trend(_) => "trend",
            AggregationQuery::Funnel(_) => "funnel",
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            AggregationQuery::Trend(q) => &q.project_id,
            AggregationQuery::Funnel(q) => &q.project_id,
        }
    }

    /// The parameter set that identifies this query, excluding the project.
    pub fn params_json(&self) -> Value {
        match self {
            AggregationQuery::Trend(q) => json!({
                "event": q.event,
                "date_from": q.range.from.to_string(),
                "date_to": q.range.to.to_string(),
                "interval": q.interval.as_str(),
            }),
            AggregationQuery::Funnel(q) => json!({
                "steps": q.steps,
                "date_from": q.range.from.to_string(),
                "date_to": q.range.to.to_string(),
                "strict": q.mode == FunnelMode::Strict,
                "conversion_window_days": q.conversion_window_days,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(untagged)]
pub enum AggregationResult {
    Trend(TrendResult),
    Funnel(FunnelResult),
}

impl From<TrendResult> for AggregationResult {
    fn from(result: TrendResult) -> Self {
        AggregationResult::Trend(result)
    }
}

impl From<FunnelResult> for AggregationResult {
    fn from(result: FunnelResult) -> Self {
        AggregationResult::Funnel(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_interval_parse_falls_back_to_day() {
        assert_eq!(Interval::parse_lenient("week"), Interval::Week);
        assert_eq!(Interval::parse_lenient("MONTH"), Interval::Month);
        assert_eq!(Interval::parse_lenient("hour"), Interval::Day);
        assert_eq!(Interval::parse_lenient(""), Interval::Day);
    }

    #[test]
    fn test_bucket_start() {
        // 2026-10-15 is a Thursday.
        let d = date(2026, 10, 15);
        assert_eq!(Interval::Day.bucket_start(d), d);
        assert_eq!(Interval::Week.bucket_start(d), date(2026, 10, 12));
        assert_eq!(Interval::Week.bucket_start(date(2026, 10, 12)), date(2026, 10, 12));
        assert_eq!(Interval::Month.bucket_start(d), date(2026, 10, 1));
    }

    #[test]
    fn test_date_range_bounds() {
        let range = DateRange::parse("2026-10-01", "2026-10-01").unwrap();
        assert!(range.contains(Utc.with_ymd_and_hms(2026, 10, 1, 23, 59, 59).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2026, 10, 2, 0, 0, 0).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2026, 9, 30, 23, 59, 59).unwrap()));
    }

    #[test]
    fn test_date_range_rejects_inverted_and_malformed() {
        assert!(DateRange::parse("2026-10-02", "2026-10-01").is_err());
        let err = DateRange::parse("10/01/2026", "2026-10-01").unwrap_err();
        assert_eq!(err.errors[0].field, "date_from");
    }

    #[test]
    fn test_conversion_window_clamp() {
        assert_eq!(clamp_conversion_window(None), 30);
        assert_eq!(clamp_conversion_window(Some(0)), 1);
        assert_eq!(clamp_conversion_window(Some(1000)), 365);
        assert_eq!(clamp_conversion_window(Some(7)), 7);
    }

    #[test]
    fn test_recent_limit_capped() {
        assert_eq!(RecentEventsQuery::new("p", None).limit, 100);
        assert_eq!(RecentEventsQuery::new("p", Some(10_000)).limit, 500);
    }

    #[test]
    fn test_funnel_result_serialization() {
        let steps = vec!["a".to_string(), "b".to_string()];
        let strict = FunnelResult::from_counts(&steps, &[5, 2], FunnelMode::Strict, 14);
        let value = serde_json::to_value(&strict).unwrap();
        assert_eq!(value["mode"], "strict");
        assert_eq!(value["conversion_window_days"], 14);
        assert_eq!(value["steps"][1]["step"], 2);

        let simple = FunnelResult::from_counts(&steps, &[5, 2], FunnelMode::Simple, 14);
        let value = serde_json::to_value(&simple).unwrap();
        assert!(value.get("conversion_window_days").is_none());
    }

    #[test]
    fn test_aggregation_result_untagged_roundtrip() {
        let trend = AggregationResult::Trend(TrendResult {
            series: vec![1, 2],
            labels: vec!["2026-10-01".into(), "2026-10-02".into()],
        });
        let back: AggregationResult =
            serde_json::from_value(serde_json::to_value(&trend).unwrap()).unwrap();
        assert_eq!(back, trend);
    }
}

//! Row-level aggregation.
//!
//! Pure functions over event rows. The in-memory store answers queries with
//! these directly; the ClickHouse store pushes the same definitions down into
//! SQL.

use std::collections::{BTreeMap, HashMap, HashSet};

use beacon_core::{DateRange, EventRow, Interval, Timestamp, TrendResult};
use chrono::Duration;

fn in_scope<'a: 'b, 'b, I>(
    rows: I,
    project_id: &'b str,
    range: &'b DateRange,
) -> impl Iterator<Item = &'a EventRow> + 'b
where
    I: IntoIterator<Item = &'a EventRow>,
    I::IntoIter: 'b,
{
    rows.into_iter()
        .filter(move |r| r.project_id == project_id && range.contains(r.timestamp))
}

/// Bucket matching rows by period start. Only non-empty buckets are returned.
pub fn trend_buckets<'a>(
    rows: impl IntoIterator<Item = &'a EventRow>,
    project_id: &str,
    event: &str,
    range: &DateRange,
    interval: Interval,
) -> TrendResult {
    let mut buckets = BTreeMap::new();
    for row in in_scope(rows, project_id, range).filter(|r| r.event == event) {
        *buckets
            .entry(interval.bucket_start(row.timestamp.date_naive()))
            .or_insert(0u64) += 1;
    }

    let (labels, series) = buckets
        .into_iter()
        .map(|(start, count)| (start.format("%Y-%m-%d").to_string(), count))
        .unzip();
    TrendResult { series, labels }
}

/// Distinct subjects per step, no ordering between steps.
pub fn simple_funnel_counts<'a>(
    rows: impl IntoIterator<Item = &'a EventRow>,
    project_id: &str,
    steps: &[String],
    range: &DateRange,
) -> Vec<u64> {
    let mut subjects: HashMap<&str, HashSet<&str>> = HashMap::new();
    for row in in_scope(rows, project_id, range) {
        subjects
            .entry(row.event.as_str())
            .or_default()
            .insert(row.distinct_id.as_str());
    }
    steps
        .iter()
        .map(|step| subjects.get(step.as_str()).map_or(0, |s| s.len() as u64))
        .collect()
}

/// First occurrence of each step event per subject.
///
/// Steps sharing a name share a first-occurrence time.
fn first_occurrences<'a>(
    rows: impl IntoIterator<Item = &'a EventRow>,
    project_id: &str,
    steps: &[String],
    range: &DateRange,
) -> HashMap<String, Vec<Option<Timestamp>>> {
    let mut positions: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, step) in steps.iter().enumerate() {
        positions.entry(step.as_str()).or_default().push(idx);
    }

    let mut firsts: HashMap<String, Vec<Option<Timestamp>>> = HashMap::new();
    for row in in_scope(rows, project_id, range) {
        let Some(idxs) = positions.get(row.event.as_str()) else {
            continue;
        };
        let times = firsts
            .entry(row.distinct_id.clone())
            .or_insert_with(|| vec![None; steps.len()]);
        for &idx in idxs {
            match times[idx] {
                Some(existing) if existing <= row.timestamp => {}
                _ => times[idx] = Some(row.timestamp),
            }
        }
    }
    firsts
}

/// Number of leading steps a subject satisfies in strict mode.
///
/// Step `i` holds when steps `0..=i` all occurred, their first occurrences are
/// strictly increasing, and step `i` is within `window_days` of step 0.
pub fn strict_prefix_len(times: &[Option<Timestamp>], window_days: u32) -> usize {
    let window = Duration::days(i64::from(window_days));
    let Some(Some(first)) = times.first().copied() else {
        return 0;
    };

    let mut reached = 1;
    let mut previous = first;
    for time in times.iter().skip(1) {
        let Some(time) = *time else { break };
        if time <= previous || time - first > window {
            break;
        }
        previous = time;
        reached += 1;
    }
    reached
}

/// Subjects satisfying each step's full strict prefix condition.
pub fn strict_funnel_counts<'a>(
    rows: impl IntoIterator<Item = &'a EventRow>,
    project_id: &str,
    steps: &[String],
    range: &DateRange,
    window_days: u32,
) -> Vec<u64> {
    let mut counts = vec![0u64; steps.len()];
    for times in first_occurrences(rows, project_id, steps, range).values() {
        let reached = strict_prefix_len(times, window_days);
        for count in counts.iter_mut().take(reached) {
            *count += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::new_event_id;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    fn row(event: &str, who: &str, ts: Timestamp) -> EventRow {
        EventRow {
            timestamp: ts,
            uuid: new_event_id(),
            event: event.to_string(),
            distinct_id: who.to_string(),
            project_id: "p".to_string(),
            properties: "{}".to_string(),
            lib: None,
            lib_version: None,
            device_id: None,
        }
    }

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 31).unwrap(),
        )
        .unwrap()
    }

    fn at(day: u32, hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2026, 10, day, hour, 0, 0).unwrap()
    }

    fn steps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_trend_groups_by_week() {
        let rows = vec![
            row("view", "a", at(12, 1)),
            row("view", "b", at(18, 23)),
            row("view", "a", at(19, 0)),
            row("click", "a", at(19, 0)),
        ];
        let result = trend_buckets(&rows, "p", "view", &range(), Interval::Week);
        assert_eq!(result.labels, vec!["2026-10-12", "2026-10-19"]);
        assert_eq!(result.series, vec![2, 1]);
    }

    #[test]
    fn test_trend_excludes_other_projects_and_out_of_range() {
        let mut other = row("view", "a", at(2, 0));
        other.project_id = "q".to_string();
        let late = row("view", "a", Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap());
        let result = trend_buckets(&[other, late], "p", "view", &range(), Interval::Day);
        assert!(result.series.is_empty());
        assert!(result.labels.is_empty());
    }

    #[test]
    fn test_simple_funnel_counts_distinct_subjects() {
        let rows = vec![
            row("view", "a", at(1, 0)),
            row("view", "a", at(2, 0)),
            row("view", "b", at(3, 0)),
            row("buy", "b", at(1, 0)),
        ];
        assert_eq!(
            simple_funnel_counts(&rows, "p", &steps(&["view", "buy"]), &range()),
            vec![2, 1]
        );
    }

    #[test]
    fn test_strict_funnel_requires_order() {
        let rows = vec![
            // a converts in order
            row("view", "a", at(1, 0)),
            row("buy", "a", at(1, 5)),
            // b buys before first viewing
            row("buy", "b", at(1, 0)),
            row("view", "b", at(2, 0)),
        ];
        assert_eq!(
            strict_funnel_counts(&rows, "p", &steps(&["view", "buy"]), &range(), 30),
            vec![2, 1]
        );
    }

    #[test]
    fn test_strict_funnel_window() {
        let rows = vec![row("view", "a", at(1, 0)), row("buy", "a", at(9, 0))];
        let s = steps(&["view", "buy"]);
        assert_eq!(strict_funnel_counts(&rows, "p", &s, &range(), 7), vec![1, 0]);
        assert_eq!(strict_funnel_counts(&rows, "p", &s, &range(), 8), vec![1, 1]);
    }

    #[test]
    fn test_strict_window_boundary_is_exact() {
        let t0 = at(1, 0);
        let edge = t0 + Duration::days(1);
        assert_eq!(strict_prefix_len(&[Some(t0), Some(edge)], 1), 2);
        assert_eq!(
            strict_prefix_len(&[Some(t0), Some(edge + Duration::milliseconds(900))], 1),
            1
        );
        assert_eq!(
            strict_prefix_len(&[Some(t0), Some(edge + Duration::milliseconds(1))], 1),
            1
        );
    }

    #[test]
    fn test_strict_prefix_stops_at_gap() {
        let t = at(1, 0);
        let times = vec![Some(t), None, Some(t + Duration::hours(2))];
        assert_eq!(strict_prefix_len(&times, 30), 1);
        assert_eq!(strict_prefix_len(&[None, Some(t)], 30), 0);
    }

    #[test]
    fn test_repeated_step_names_fail_strict_increase() {
        let rows = vec![row("view", "a", at(1, 0)), row("view", "a", at(2, 0))];
        assert_eq!(
            strict_funnel_counts(&rows, "p", &steps(&["view", "view"]), &range(), 30),
            vec![1, 0]
        );
    }
}

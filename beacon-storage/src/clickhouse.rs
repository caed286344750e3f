//! ClickHouse columnar store over the HTTP interface.
//!
//! Writes use `INSERT ... FORMAT JSONEachRow`; reads use server-side bound
//! query parameters (`{name:Type}` placeholders with `param_name` values), so
//! user-supplied strings never appear in SQL text.

use std::time::Duration;

use ::async_trait::async_trait;
use beacon_core::{
    EventRow, FunnelMode, FunnelQuery, Interval, RecentEventsQuery, StoreError, StoreResult,
    StoredEvent, Timestamp, TrendQuery, TrendResult,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::ColumnarStore;

/// DateTime64(3) text form accepted by ClickHouse input formats and parameters.
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Connection settings for the ClickHouse HTTP endpoint.
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    /// Base URL, e.g. `http://localhost:8123`.
    pub url: String,
    pub database: String,
    pub table: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub request_timeout: Duration,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "analytics".to_string(),
            table: "events".to_string(),
            user: None,
            password: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClickHouseConfig {
    /// Fully qualified, quoted table name.
    fn qualified_table(&self) -> String {
        format!(
            "`{}`.`{}`",
            self.database.replace('`', ""),
            self.table.replace('`', "")
        )
    }
}

// ============================================================================
// STORE
// ============================================================================

/// [`ColumnarStore`] backed by ClickHouse.
#[derive(Debug, Clone)]
pub struct ClickHouseStore {
    client: reqwest::Client,
    config: ClickHouseConfig,
}

impl ClickHouseStore {
    pub fn new(config: ClickHouseConfig) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StoreError::unavailable(format!("failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClickHouseConfig {
        &self.config
    }

    /// Create the database and events table if they do not exist.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        let database = self.config.database.replace('`', "");
        self.execute(&format!("CREATE DATABASE IF NOT EXISTS `{}`", database), "")
            .await?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                timestamp DateTime64(3, 'UTC'),
                uuid UUID,
                event String,
                distinct_id String,
                project_id String,
                properties String,
                lib Nullable(String),
                lib_version Nullable(String),
                device_id Nullable(String)
            ) ENGINE = MergeTree
            PARTITION BY toYYYYMM(timestamp)
            ORDER BY (project_id, event, timestamp)",
            self.config.qualified_table()
        );
        self.execute(&ddl, "").await?;
        debug!(table = %self.config.qualified_table(), "ClickHouse schema ensured");
        Ok(())
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.query(&[("database", self.config.database.as_str())]);
        match &self.config.user {
            Some(user) => builder.basic_auth(user, self.config.password.as_deref()),
            None => builder,
        }
    }

    /// Run a statement with `body` as its data.
    async fn execute(&self, query: &str, body: &str) -> StoreResult<String> {
        let builder = self
            .request(self.client.post(&self.config.url))
            .query(&[("query", query)])
            .body(body.to_string());
        self.send(builder).await
    }

    /// Run a parameterized `SELECT ... FORMAT JSONEachRow` and decode each line.
    async fn select<T: for<'de> Deserialize<'de>>(
        &self,
        sql: &str,
        params: &[(String, String)],
    ) -> StoreResult<Vec<T>> {
        let builder = self
            .request(self.client.post(&self.config.url))
            .query(&[("output_format_json_quote_64bit_integers", "0")])
            .query(params)
            .body(sql.to_string());
        let text = self.send(builder).await?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| StoreError::Decode {
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> StoreResult<String> {
        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        if status.is_success() {
            return Ok(text);
        }

        let reason = text.trim().chars().take(512).collect::<String>();
        if status.is_server_error() {
            warn!(status = status.as_u16(), %reason, "ClickHouse server error");
            Err(StoreError::Unavailable { reason })
        } else {
            Err(StoreError::Rejected {
                status: status.as_u16(),
                reason,
            })
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout {
                timeout_ms: self.config.request_timeout.as_millis() as u64,
            }
        } else {
            StoreError::unavailable(err.to_string())
        }
    }
}

// ============================================================================
// SQL BUILDING
// ============================================================================

fn format_ts(ts: Timestamp) -> String {
    ts.format(DATETIME_FORMAT).to_string()
}

fn param(name: &str, value: impl Into<String>) -> (String, String) {
    (format!("param_{}", name), value.into())
}

fn bucket_expr(interval: Interval) -> &'static str {
    match interval {
        Interval::Day => "toDate(timestamp)",
        // Mode 1: weeks start on Monday.
        Interval::Week => "toStartOfWeek(timestamp, 1)",
        Interval::Month => "toStartOfMonth(timestamp)",
    }
}

const RANGE_FILTER: &str = "project_id = {project:String} \
    AND timestamp >= {date_from:DateTime64(3, 'UTC')} \
    AND timestamp < {date_to:DateTime64(3, 'UTC')}";

fn range_params(project_id: &str, from: Timestamp, to_exclusive: Timestamp) -> Vec<(String, String)> {
    vec![
        param("project", project_id),
        param("date_from", format_ts(from)),
        param("date_to", format_ts(to_exclusive)),
    ]
}

/// Distinct subjects per step, one `uniqExactIf` column per step.
pub(crate) fn simple_funnel_sql(table: &str, steps: usize) -> String {
    let columns = (0..steps)
        .map(|i| format!("uniqExactIf(distinct_id, event = {{s{i}:String}}) AS c{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {columns} FROM {table} WHERE {RANGE_FILTER} FORMAT JSONEachRow")
}

/// Per-subject first occurrences, then prefix conditions per step.
pub(crate) fn strict_funnel_sql(table: &str, steps: usize) -> String {
    let per_subject = (0..steps)
        .map(|i| {
            format!(
                "minIf(timestamp, event = {{s{i}:String}}) AS t{i}, \
                 countIf(event = {{s{i}:String}}) > 0 AS has{i}"
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    let step_names = (0..steps)
        .map(|i| format!("{{s{i}:String}}"))
        .collect::<Vec<_>>()
        .join(", ");

    let counts = (0..steps)
        .map(|i| {
            let mut conditions: Vec<String> = (0..=i).map(|j| format!("has{j}")).collect();
            conditions.extend((1..=i).map(|j| format!("t{} < t{}", j - 1, j)));
            if i > 0 {
                conditions.push(format!("t{i} <= addDays(t0, {{window_days:UInt32}})"));
            }
            format!("countIf({}) AS c{i}", conditions.join(" AND "))
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "SELECT {counts} FROM (\
            SELECT distinct_id, {per_subject} FROM {table} \
            WHERE {RANGE_FILTER} AND event IN ({step_names}) \
            GROUP BY distinct_id\
        ) FORMAT JSONEachRow"
    )
}

// ============================================================================
// ROW SHAPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct BucketRow {
    bucket: String,
    c: u64,
}

#[derive(Debug, Deserialize)]
struct RecentRow {
    ts_ms: i64,
    uuid: String,
    event: String,
    distinct_id: String,
    project_id: String,
    properties: String,
    lib: Option<String>,
    lib_version: Option<String>,
    device_id: Option<String>,
}

impl RecentRow {
    fn into_stored(self) -> StoreResult<StoredEvent> {
        let timestamp = DateTime::<Utc>::from_timestamp_millis(self.ts_ms).ok_or_else(|| {
            StoreError::Decode {
                reason: format!("timestamp out of range: {}", self.ts_ms),
            }
        })?;
        let uuid = Uuid::parse_str(&self.uuid).map_err(|e| StoreError::Decode {
            reason: e.to_string(),
        })?;
        Ok(StoredEvent {
            timestamp,
            uuid,
            event: self.event,
            distinct_id: self.distinct_id,
            project_id: self.project_id,
            properties: serde_json::from_str(&self.properties)
                .unwrap_or_else(|_| Value::Object(Map::new())),
            lib: self.lib,
            lib_version: self.lib_version,
            device_id: self.device_id,
        })
    }
}

fn insert_line(row: &EventRow) -> Value {
    json!({
        "timestamp": format_ts(row.timestamp),
        "uuid": row.uuid.to_string(),
        "event": row.event,
        "distinct_id": row.distinct_id,
        "project_id": row.project_id,
        "properties": row.properties,
        "lib": row.lib,
        "lib_version": row.lib_version,
        "device_id": row.device_id,
    })
}

fn counts_from_row(row: &Map<String, Value>, steps: usize) -> StoreResult<Vec<u64>> {
    (0..steps)
        .map(|i| {
            row.get(&format!("c{}", i))
                .and_then(Value::as_u64)
                .ok_or_else(|| StoreError::Decode {
                    reason: format!("missing funnel column c{}", i),
                })
        })
        .collect()
}

#[async_trait]
impl ColumnarStore for ClickHouseStore {
    async fn insert_batch(&self, rows: &[EventRow]) -> StoreResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut body = String::new();
        for row in rows {
            body.push_str(&insert_line(row).to_string());
            body.push('\n');
        }
        let query = format!(
            "INSERT INTO {} (timestamp, uuid, event, distinct_id, project_id, properties, lib, lib_version, device_id) FORMAT JSONEachRow",
            self.config.qualified_table()
        );
        self.execute(&query, &body).await?;
        debug!(rows = rows.len(), "Inserted batch into ClickHouse");
        Ok(())
    }

    async fn trend(&self, query: &TrendQuery) -> StoreResult<TrendResult> {
        let sql = format!(
            "SELECT toString({}) AS bucket, count() AS c FROM {} \
             WHERE {} AND event = {{event:String}} \
             GROUP BY bucket ORDER BY bucket FORMAT JSONEachRow",
            bucket_expr(query.interval),
            self.config.qualified_table(),
            RANGE_FILTER
        );
        let mut params = range_params(
            &query.project_id,
            query.range.start(),
            query.range.end_exclusive(),
        );
        params.push(param("event", query.event.as_str()));

        let rows: Vec<BucketRow> = self.select(&sql, &params).await?;
        let (labels, series) = rows.into_iter().map(|r| (r.bucket, r.c)).unzip();
        Ok(TrendResult { series, labels })
    }

    async fn funnel(&self, query: &FunnelQuery) -> StoreResult<Vec<u64>> {
        if query.steps.is_empty() {
            return Ok(Vec::new());
        }
        let table = self.config.qualified_table();
        let sql = match query.mode {
            FunnelMode::Simple => simple_funnel_sql(&table, query.steps.len()),
            FunnelMode::Strict => strict_funnel_sql(&table, query.steps.len()),
        };

        let mut params = range_params(
            &query.project_id,
            query.range.start(),
            query.range.end_exclusive(),
        );
        for (i, step) in query.steps.iter().enumerate() {
            params.push(param(&format!("s{}", i), step.as_str()));
        }
        if query.mode == FunnelMode::Strict {
            params.push(param(
                "window_days",
                query.conversion_window_days.to_string(),
            ));
        }

        let rows: Vec<Map<String, Value>> = self.select(&sql, &params).await?;
        match rows.first() {
            Some(row) => counts_from_row(row, query.steps.len()),
            None => Ok(vec![0; query.steps.len()]),
        }
    }

    async fn recent(&self, query: &RecentEventsQuery) -> StoreResult<Vec<StoredEvent>> {
        let sql = format!(
            "SELECT toUnixTimestamp64Milli(timestamp) AS ts_ms, toString(uuid) AS uuid, \
             event, distinct_id, project_id, properties, lib, lib_version, device_id \
             FROM {} WHERE project_id = {{project:String}} \
             ORDER BY timestamp DESC LIMIT {{limit:UInt32}} FORMAT JSONEachRow",
            self.config.qualified_table()
        );
        let params = vec![
            param("project", query.project_id.as_str()),
            param("limit", query.limit.to_string()),
        ];
        let rows: Vec<RecentRow> = self.select(&sql, &params).await?;
        rows.into_iter().map(RecentRow::into_stored).collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        let url = format!("{}/ping", self.config.url.trim_end_matches('/'));
        let builder = self.client.get(url);
        self.send(builder).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_qualified_table_strips_backticks() {
        let config = ClickHouseConfig {
            database: "ana`lytics".to_string(),
            ..Default::default()
        };
        assert_eq!(config.qualified_table(), "`analytics`.`events`");
    }

    #[test]
    fn test_format_ts_millisecond_precision() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 15, 8, 30, 1).unwrap();
        assert_eq!(format_ts(ts), "2026-10-15 08:30:01.000");
    }

    #[test]
    fn test_simple_funnel_sql_binds_every_step() {
        let sql = simple_funnel_sql("t", 3);
        assert!(sql.contains("{s0:String}"));
        assert!(sql.contains("{s2:String}"));
        assert!(sql.contains("AS c2"));
        assert!(!sql.contains("{s3:String}"));
    }

    #[test]
    fn test_strict_funnel_sql_prefix_conditions() {
        let sql = strict_funnel_sql("t", 3);
        assert!(sql.contains("countIf(has0) AS c0"));
        assert!(sql.contains(
            "countIf(has0 AND has1 AND has2 AND t0 < t1 AND t1 < t2 AND t2 <= addDays(t0, {window_days:UInt32})) AS c2"
        ));
        assert!(sql.contains("GROUP BY distinct_id"));
    }

    #[test]
    fn test_insert_line_shape() {
        let row = EventRow {
            timestamp: Utc.with_ymd_and_hms(2026, 10, 15, 0, 0, 0).unwrap(),
            uuid: Uuid::nil(),
            event: "signup".to_string(),
            distinct_id: "u1".to_string(),
            project_id: "default".to_string(),
            properties: "{}".to_string(),
            lib: None,
            lib_version: None,
            device_id: None,
        };
        let line = insert_line(&row);
        assert_eq!(line["timestamp"], "2026-10-15 00:00:00.000");
        assert!(line["lib"].is_null());
        assert_eq!(line["properties"], "{}");
    }

    #[test]
    fn test_counts_from_row_requires_every_column() {
        let row = json!({"c0": 4, "c1": 2}).as_object().unwrap().clone();
        assert_eq!(counts_from_row(&row, 2).unwrap(), vec![4, 2]);
        assert!(counts_from_row(&row, 3).is_err());
    }
}

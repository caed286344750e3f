//! Canonical event and columnar row types

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::Timestamp;

/// The validated, defaulted internal representation of one behavioral event.
///
/// This is also the broker wire format: serialized as UTF-8 JSON with every
/// optional field present (absent values are `null`) and library metadata
/// under the `$`-prefixed names clients send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CanonicalEvent {
    pub event: String,
    pub distinct_id: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = DateTime))]
    pub timestamp: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub properties: Option<Map<String, Value>>,
    pub uuid: Uuid,
    pub project_id: String,
    #[serde(rename = "$lib")]
    pub lib: Option<String>,
    #[serde(rename = "$lib_version")]
    pub lib_version: Option<String>,
    #[serde(rename = "$device_id")]
    pub device_id: Option<String>,
}

impl CanonicalEvent {
    /// Partition key: the subject identifier, so one subject's events share a partition.
    pub fn partition_key(&self) -> &str {
        &self.distinct_id
    }

    /// Broker value bytes.
    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// A canonical event paired with the key it is published under.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedEvent {
    pub key: String,
    pub event: CanonicalEvent,
}

impl From<CanonicalEvent> for KeyedEvent {
    fn from(event: CanonicalEvent) -> Self {
        Self {
            key: event.partition_key().to_string(),
            event,
        }
    }
}

/// One row of the columnar events table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub timestamp: Timestamp,
    pub uuid: Uuid,
    pub event: String,
    pub distinct_id: String,
    pub project_id: String,
    /// Properties as a JSON string (`"{}"` when absent).
    pub properties: String,
    pub lib: Option<String>,
    pub lib_version: Option<String>,
    pub device_id: Option<String>,
}

impl From<&CanonicalEvent> for EventRow {
    fn from(event: &CanonicalEvent) -> Self {
        let properties = event
            .properties
            .as_ref()
            .map(|p| Value::Object(p.clone()).to_string())
            .unwrap_or_else(|| "{}".to_string());
        Self {
            timestamp: event.timestamp,
            uuid: event.uuid,
            event: event.event.clone(),
            distinct_id: event.distinct_id.clone(),
            project_id: event.project_id.clone(),
            properties,
            lib: event.lib.clone(),
            lib_version: event.lib_version.clone(),
            device_id: event.device_id.clone(),
        }
    }
}

/// Parse a client timestamp: RFC 3339, or a naive ISO-8601 datetime read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

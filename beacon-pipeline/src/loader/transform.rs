//! Broker payload to columnar row.

use beacon_core::config::{
    MAX_DEVICE_ID_CHARS, MAX_LIB_CHARS, MAX_LIB_VERSION_CHARS, MAX_NAME_CHARS,
    MAX_PROJECT_ID_CHARS,
};
use beacon_core::{
    new_event_id, parse_timestamp, truncate_chars, EventRow, RowError, Timestamp,
    DEFAULT_PROJECT_ID,
};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Build a row from a raw wire payload.
///
/// `event` and `distinct_id` must be present and non-empty. Text fields are
/// truncated to their column caps, a missing project becomes `"default"`, an
/// absent or unparseable timestamp becomes `loaded_at`, and an absent or
/// malformed uuid is replaced with a fresh one.
pub fn row_from_payload(payload: &[u8], loaded_at: Timestamp) -> Result<EventRow, RowError> {
    let value: Value = serde_json::from_slice(payload).map_err(|e| RowError::InvalidJson {
        reason: e.to_string(),
    })?;
    let Value::Object(raw) = value else {
        return Err(RowError::NotAnObject);
    };
    row_from_object(&raw, loaded_at)
}

pub fn row_from_object(raw: &Map<String, Value>, loaded_at: Timestamp) -> Result<EventRow, RowError> {
    let event = required_text(raw, "event")?;
    let distinct_id = required_text(raw, "distinct_id")?;

    let timestamp = raw
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or(loaded_at);

    let uuid = raw
        .get("uuid")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(new_event_id);

    let project_id = text(raw.get("project_id"))
        .filter(|s| !s.is_empty())
        .map(|s| truncate_chars(&s, MAX_PROJECT_ID_CHARS))
        .unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string());

    let properties = match raw.get("properties") {
        Some(Value::Object(map)) if !map.is_empty() => Value::Object(map.clone()).to_string(),
        _ => "{}".to_string(),
    };

    Ok(EventRow {
        timestamp,
        uuid,
        event: truncate_chars(&event, MAX_NAME_CHARS),
        distinct_id: truncate_chars(&distinct_id, MAX_NAME_CHARS),
        project_id,
        properties,
        lib: optional_text(raw, &["$lib", "lib"], MAX_LIB_CHARS),
        lib_version: optional_text(raw, &["$lib_version", "lib_version"], MAX_LIB_VERSION_CHARS),
        device_id: optional_text(raw, &["$device_id", "device_id"], MAX_DEVICE_ID_CHARS),
    })
}

/// Strings as-is, numbers and booleans in their JSON form.
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn required_text(raw: &Map<String, Value>, field: &'static str) -> Result<String, RowError> {
    text(raw.get(field))
        .filter(|s| !s.is_empty())
        .ok_or(RowError::MissingField { field })
}

/// First non-empty value among `names`.
fn optional_text(raw: &Map<String, Value>, names: &[&str], max: usize) -> Option<String> {
    names
        .iter()
        .filter_map(|name| text(raw.get(*name)))
        .find(|s| !s.is_empty())
        .map(|s| truncate_chars(&s, max))
}

//! Dead-letter records and sink.

use std::sync::Arc;

use beacon_core::config::MAX_NAME_CHARS;
use beacon_core::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LogError;
use crate::log::LogProducer;

/// Key used when a payload carries no usable subject id.
pub const UNKNOWN_KEY: &str = "unknown";

/// Why a record left the primary path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterKind {
    /// The record could not be turned into a row.
    ParseError,
    /// The batch containing the record could not be written.
    InsertFailed,
}

/// Dead-letter topic value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Original payload: the JSON value when it parses, otherwise the
    /// payload text (lossily decoded as UTF-8).
    pub raw: Value,
    pub error_kind: DeadLetterKind,
    pub error_message: String,
    /// `%Y-%m-%dT%H:%M:%SZ`
    pub dlq_ts: String,
}

impl DeadLetterRecord {
    pub fn new(
        raw: &[u8],
        error_kind: DeadLetterKind,
        error_message: impl Into<String>,
        at: Timestamp,
    ) -> Self {
        Self {
            raw: serde_json::from_slice(raw)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw).into_owned())),
            error_kind,
            error_message: error_message.into(),
            dlq_ts: at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }

    /// Subject id from the raw payload, capped at 4096 bytes, or `"unknown"`.
    pub fn key(&self) -> String {
        match self.raw.get("distinct_id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => truncate_bytes(id, MAX_NAME_CHARS),
            _ => UNKNOWN_KEY.to_string(),
        }
    }
}

fn truncate_bytes(value: &str, max: usize) -> String {
    if value.len() <= max {
        return value.to_string();
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Publishes dead-letter records to the dead-letter topic.
#[derive(Clone)]
pub struct DeadLetterSink {
    producer: Arc<dyn LogProducer>,
    topic: String,
}

impl std::fmt::Debug for DeadLetterSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterSink")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl DeadLetterSink {
    pub fn new(producer: Arc<dyn LogProducer>, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn send(&self, record: &DeadLetterRecord) -> Result<(), LogError> {
        let value = serde_json::to_vec(record).map_err(|e| LogError::Produce {
            topic: self.topic.clone(),
            reason: e.to_string(),
        })?;
        self.producer
            .send(&self.topic, record.key().as_bytes(), &value)
            .await
    }
}

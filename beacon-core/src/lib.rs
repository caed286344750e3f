//! Beacon Core - Event Model and Query Types
//!
//! Shared data structures for the ingestion pipeline and the aggregation
//! engine. Everything that crosses a crate boundary lives here: the canonical
//! event and its columnar row, the ingress validator, query requests and
//! results, and the error taxonomy.

pub mod config;
pub mod error;
pub mod event;
pub mod query;
pub mod sanitize;
pub mod validation;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub use config::IngestLimits;
pub use error::{
    FieldError, IngestError, PropertiesViolation, RowError, StoreError, StoreResult,
    ValidationError,
};
pub use event::{parse_timestamp, truncate_chars, CanonicalEvent, EventRow, KeyedEvent};
pub use query::{
    clamp_conversion_window, AggregationQuery, AggregationResult, DateRange, FunnelMode, FunnelQuery, FunnelResult,
    FunnelStep, Interval, RecentEventsQuery, StoredEvent, TrendQuery, TrendResult,
};
pub use validation::{check_properties, IngestContext, IngressValidator};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Event identifier. UUIDv7 so ids sort by ingestion time.
pub type EventId = Uuid;

/// Project identifier applied when neither the caller nor the API key names one.
pub const DEFAULT_PROJECT_ID: &str = "default";

/// Generate a new UUIDv7 event id.
pub fn new_event_id() -> EventId {
    Uuid::now_v7()
}

/// Hex-encoded SHA-256 of the given bytes.
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

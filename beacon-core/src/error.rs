//! Error types for beacon operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single field-level validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FieldError {
    /// Dotted path of the offending field (`batch[2].distinct_id`).
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Malformed or over-limit submission. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    /// Human-readable summary.
    pub message: String,
    /// Structured per-field errors, empty when the failure is not field-specific.
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    /// Error that is not tied to a particular field.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    /// Build from a non-empty list of field errors; the summary joins them.
    pub fn from_fields(errors: Vec<FieldError>) -> Self {
        let message = errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Self { message, errors }
    }
}

/// Outcome of the bounded properties check.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PropertiesViolation {
    #[error("properties has {count} keys; maximum is {max}")]
    TooManyKeys { count: usize, max: usize },

    #[error("properties depth exceeds maximum {max}")]
    TooDeep { max: usize },

    #[error("properties serialized size {bytes} bytes exceeds maximum {max} bytes")]
    TooLarge { bytes: usize, max: usize },
}

/// Errors raised while turning an HTTP body into canonical events.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("request body of {size} bytes exceeds maximum of {limit} bytes")]
    BodyTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A log record that cannot be turned into a columnar row.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("payload is not valid JSON: {reason}")]
    InvalidJson { reason: String },

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("required field missing: {field}")]
    MissingField { field: &'static str },
}

/// Columnar store errors, split by whether a retry can help.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("store request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("store rejected request (status {status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("failed to decode store response: {reason}")]
    Decode { reason: String },
}

impl StoreError {
    /// Transient failures are retried by the loader; the rest dead-letter at once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. } | StoreError::Timeout { .. })
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        StoreError::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// TESTS
// =============================================================================

//! Error types for the ingestion pipeline

use thiserror::Error;

/// Partitioned log client errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LogError {
    #[error("broker connection failed: {reason}")]
    Connection { reason: String },

    #[error("produce to topic '{topic}' failed: {reason}")]
    Produce { topic: String, reason: String },

    #[error("consume failed: {reason}")]
    Consume { reason: String },

    #[error("offset commit failed: {reason}")]
    Commit { reason: String },
}

/// Publish failures surfaced to capture callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// The send deadline expired before every record was acknowledged.
    #[error("broker did not acknowledge within {timeout_ms}ms")]
    Backpressure { timeout_ms: u64 },

    #[error(transparent)]
    Broker(#[from] LogError),

    #[error("failed to encode event: {reason}")]
    Encode { reason: String },
}

/// Fatal loader conditions. Anything recoverable is handled inside the loop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoaderError {
    #[error("broker connectivity lost: {0}")]
    Broker(#[from] LogError),

    #[error("dead-letter publish failed: {0}")]
    DeadLetter(LogError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_error_from_log_error() {
        let err: PublishError = LogError::Connection {
            reason: "refused".to_string(),
        }
        .into();
        assert!(matches!(err, PublishError::Broker(LogError::Connection { .. })));
        assert_eq!(err.to_string(), "broker connection failed: refused");
    }

    #[test]
    fn test_backpressure_display() {
        let err = PublishError::Backpressure { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "broker did not acknowledge within 5000ms");
    }
}

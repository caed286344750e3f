//! Error Types for the Beacon HTTP Services
//!
//! This module defines error handling for the API layer:
//! - ErrorCode enum for categorizing errors
//! - ApiError struct for structured error responses
//! - IntoResponse implementation for Axum HTTP responses
//! - Conversions from every library error in the workspace
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use beacon_core::{IngestError, StoreError, ValidationError};
use beacon_pipeline::PublishError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

use crate::config::ConfigError;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors (401)
    // ========================================================================
    /// Missing or invalid API key
    Unauthorized,

    // ========================================================================
    // Client Errors (400, 404, 429)
    // ========================================================================
    /// Submission failed validation
    ValidationFailed,

    /// Query parameters or body are malformed
    InvalidInput,

    /// Request body exceeds the configured maximum
    BodyTooLarge,

    /// Async job does not exist or has expired
    JobNotFound,

    /// Admission limit exceeded for the current window
    TooManyRequests,

    // ========================================================================
    // Server Errors (500, 503, 504)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// The columnar store rejected or failed a query
    QueryFailed,

    /// Service is temporarily unavailable
    ServiceUnavailable,

    /// The broker did not acknowledge within the send deadline
    Backpressure,

    /// The columnar store could not be reached
    StoreUnavailable,

    /// Operation timed out
    Timeout,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,

            ErrorCode::ValidationFailed | ErrorCode::InvalidInput | ErrorCode::BodyTooLarge => {
                StatusCode::BAD_REQUEST
            }

            ErrorCode::JobNotFound => StatusCode::NOT_FOUND,

            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,

            ErrorCode::ServiceUnavailable
            | ErrorCode::Backpressure
            | ErrorCode::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,

            ErrorCode::InternalError | ErrorCode::QueryFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "Missing or invalid API key",
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::BodyTooLarge => "Request body too large",
            ErrorCode::JobNotFound => "Job not found",
            ErrorCode::TooManyRequests => "Rate limit exceeded",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::QueryFailed => "Query failed",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::Backpressure => "Event broker is not keeping up; retry later",
            ErrorCode::StoreUnavailable => "Event store unavailable",
            ErrorCode::Timeout => "Operation timed out",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response returned by every endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (field errors, retry hints)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn body_too_large(limit: usize) -> Self {
        Self::new(
            ErrorCode::BodyTooLarge,
            format!("Request body exceeds maximum of {} bytes", limit),
        )
        .with_details(json!({ "limit": limit }))
    }

    pub fn job_not_found(job_id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::JobNotFound, format!("Job {} not found", job_id))
    }

    /// Create a TooManyRequests error; the response carries `Retry-After`.
    pub fn too_many_requests(retry_after_secs: u64) -> Self {
        Self::new(
            ErrorCode::TooManyRequests,
            format!("Rate limit exceeded. Retry after {} seconds", retry_after_secs),
        )
        .with_details(json!({ "retry_after": retry_after_secs }))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    fn retry_after(&self) -> Option<u64> {
        if self.code != ErrorCode::TooManyRequests {
            return None;
        }
        self.details
            .as_ref()
            .and_then(|d| d.get("retry_after"))
            .and_then(|v| v.as_u64())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after();
        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_str(&secs.to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("60")),
            );
        }
        response
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let api = ApiError::validation_failed(err.message.clone());
        if err.errors.is_empty() {
            api
        } else {
            api.with_details(json!({ "errors": err.errors }))
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::BodyTooLarge { limit, .. } => ApiError::body_too_large(limit),
            IngestError::Validation(e) => e.into(),
        }
    }
}

impl From<PublishError> for ApiError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Backpressure { timeout_ms } => ApiError::from_code(ErrorCode::Backpressure)
                .with_details(json!({ "timeout_ms": timeout_ms })),
            PublishError::Broker(e) => {
                ApiError::service_unavailable(format!("Event broker unavailable: {}", e))
            }
            PublishError::Encode { reason } => {
                ApiError::internal_error(format!("Failed to encode event: {}", reason))
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { .. } => {
                ApiError::new(ErrorCode::StoreUnavailable, err.to_string())
            }
            StoreError::Timeout { .. } => ApiError::new(ErrorCode::Timeout, err.to_string()),
            StoreError::Rejected { .. } | StoreError::Decode { .. } => {
                ApiError::new(ErrorCode::QueryFailed, err.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::internal_error(err.to_string())
    }
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::FieldError;
    use beacon_pipeline::LogError;

    #[test]
    fn test_taxonomy_status_codes() {
        let validation: ApiError = ValidationError::message("bad").into();
        assert_eq!(validation.status_code(), StatusCode::BAD_REQUEST);

        let too_large: ApiError = IngestError::BodyTooLarge { size: 10, limit: 5 }.into();
        assert_eq!(too_large.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(too_large.code, ErrorCode::BodyTooLarge);

        let backpressure: ApiError = PublishError::Backpressure { timeout_ms: 5000 }.into();
        assert_eq!(backpressure.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let broker: ApiError = PublishError::Broker(LogError::Connection {
            reason: "down".to_string(),
        })
        .into();
        assert_eq!(broker.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        assert_eq!(
            ApiError::too_many_requests(3).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ApiError::unauthorized("no").status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::job_not_found("x").status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_details_carry_field_errors() {
        let err: ApiError =
            ValidationError::from_fields(vec![FieldError::new("event", "is required")]).into();
        let details = err.details.unwrap();
        assert_eq!(details["errors"][0]["field"], "event");
        assert_eq!(err.message, "event: is required");
    }

    #[test]
    fn test_too_many_requests_sets_retry_after_header() {
        let response = ApiError::too_many_requests(17).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "17");
    }

    #[test]
    fn test_other_errors_have_no_retry_after() {
        let response = ApiError::invalid_input("nope").into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_store_error_mapping() {
        let unavailable: ApiError = StoreError::unavailable("refused").into();
        assert_eq!(unavailable.code, ErrorCode::StoreUnavailable);
        let rejected: ApiError = StoreError::Rejected {
            status: 400,
            reason: "syntax".to_string(),
        }
        .into();
        assert_eq!(rejected.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_serialization_shape() {
        let json = serde_json::to_value(ApiError::job_not_found("abc")).unwrap();
        assert_eq!(json["code"], "JOB_NOT_FOUND");
        assert_eq!(json["message"], "Job abc not found");
        assert!(json.get("details").is_none());
    }
}

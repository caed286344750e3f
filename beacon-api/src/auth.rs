//! API Key Validation
//!
//! Capture requests may carry an `X-API-Key` header. Keys are resolved to a
//! project id by an external auth service; the resolved project overrides
//! whatever the submission names.

use std::collections::HashMap;
use std::time::Duration;

use ::async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Path of the key validation endpoint, relative to the auth base URL.
pub const VALIDATE_KEY_PATH: &str = "/internal/validate-key";

/// Failure to reach or understand the auth service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("auth service request failed: {reason}")]
    Transport { reason: String },

    #[error("auth service returned unexpected status {status}")]
    UnexpectedStatus { status: u16 },

    #[error("auth service response could not be decoded: {reason}")]
    Decode { reason: String },
}

/// Resolves API keys to project ids.
#[async_trait]
pub trait KeyValidator: Send + Sync {
    /// `Ok(Some(project_id))` for a valid key, `Ok(None)` for an unknown one.
    async fn validate(&self, api_key: &str) -> Result<Option<String>, AuthError>;
}

/// Extract a non-empty API key from request headers.
pub fn api_key_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

// ============================================================================
// HTTP VALIDATOR
// ============================================================================

#[derive(Debug, Deserialize)]
struct ValidateKeyResponse {
    project_id: Option<String>,
}

/// Validates keys against `GET {base_url}/internal/validate-key`.
#[derive(Debug, Clone)]
pub struct HttpKeyValidator {
    client: reqwest::Client,
    url: String,
}

impl HttpKeyValidator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Transport {
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), VALIDATE_KEY_PATH),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl KeyValidator for HttpKeyValidator {
    async fn validate(&self, api_key: &str) -> Result<Option<String>, AuthError> {
        let response = self
            .client
            .get(&self.url)
            .header(API_KEY_HEADER, api_key)
            .send()
            .await
            .map_err(|e| AuthError::Transport {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            debug!(status = status.as_u16(), "API key rejected by auth service");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AuthError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        let body: ValidateKeyResponse = response.json().await.map_err(|e| AuthError::Decode {
            reason: e.to_string(),
        })?;
        Ok(body.project_id.filter(|p| !p.is_empty()))
    }
}

// ============================================================================
// STATIC VALIDATOR
// ============================================================================

/// Fixed key table, for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyValidator {
    keys: HashMap<String, String>,
}

impl StaticKeyValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, api_key: impl Into<String>, project_id: impl Into<String>) -> Self {
        self.keys.insert(api_key.into(), project_id.into());
        self
    }
}

#[async_trait]
impl KeyValidator for StaticKeyValidator {
    async fn validate(&self, api_key: &str) -> Result<Option<String>, AuthError> {
        Ok(self.keys.get(api_key).cloned())
    }
}

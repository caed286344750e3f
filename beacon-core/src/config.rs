//! Ingestion limits

use serde::{Deserialize, Serialize};

/// Maximum length (chars) of `event` and `distinct_id`.
pub const MAX_NAME_CHARS: usize = 4096;
/// Maximum length (chars) of a project id.
pub const MAX_PROJECT_ID_CHARS: usize = 256;
/// Maximum length (chars) of `$lib`.
pub const MAX_LIB_CHARS: usize = 128;
/// Maximum length (chars) of `$lib_version`.
pub const MAX_LIB_VERSION_CHARS: usize = 64;
/// Maximum length (chars) of `$device_id`.
pub const MAX_DEVICE_ID_CHARS: usize = 256;

/// Bounds applied by the ingress validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestLimits {
    /// Largest accepted request body, checked before parsing.
    pub max_body_bytes: usize,
    /// Largest number of events in one batch submission.
    pub max_batch_events: usize,
    pub properties_max_keys: usize,
    /// Object nesting depth; an empty map counts as depth 1.
    pub properties_max_depth: usize,
    /// Compact JSON serialization size.
    pub properties_max_bytes: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_body_bytes: 1024 * 1024,
            max_batch_events: 100,
            properties_max_keys: 50,
            properties_max_depth: 3,
            properties_max_bytes: 32 * 1024,
        }
    }
}

impl IngestLimits {
    /// Override the body limit, keeping the other bounds.
    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }
}

//! Identifier sanitization for generated aggregation queries.
//!
//! A narrow allowlist layer, not a general-purpose SQL parser. Store
//! backends bind values as parameters.

use crate::config::{MAX_NAME_CHARS, MAX_PROJECT_ID_CHARS};
use crate::event::truncate_chars;
use crate::DEFAULT_PROJECT_ID;

/// Restrict a project id to ASCII alphanumerics plus `-`, `_` and `.`.
///
/// Anything else (including an empty id) collapses to the default project.
pub fn safe_project_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let allowed = !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if allowed {
        truncate_chars(trimmed, MAX_PROJECT_ID_CHARS)
    } else {
        DEFAULT_PROJECT_ID.to_string()
    }
}

/// Accept an event name for querying; `None` for empty or over-long names.
pub fn safe_event_name(raw: &str) -> Option<&str> {
    if raw.is_empty() || raw.chars().count() > MAX_NAME_CHARS {
        None
    } else {
        Some(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_project_id() {
        assert_eq!(safe_project_id("shop-prod_1.eu"), "shop-prod_1.eu");
        assert_eq!(safe_project_id("x' OR 1=1"), "default");
        assert_eq!(safe_project_id(""), "default");
        assert_eq!(safe_project_id(&"a".repeat(300)).len(), 256);
    }

    #[test]
    fn test_safe_event_name() {
        assert_eq!(safe_event_name("signup"), Some("signup"));
        assert_eq!(safe_event_name(""), None);
        assert_eq!(safe_event_name(&"e".repeat(4097)), None);
    }
}

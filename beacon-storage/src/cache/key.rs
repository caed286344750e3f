//! Deterministic cache keys.

use beacon_core::{sha256_hex, AggregationQuery};
use serde_json::{json, Map, Value};

pub const CACHE_KEY_PREFIX: &str = "query_cache:";

/// A cache key: `query_cache:` followed by a hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(project_id: &str, query_type: &str, params: &Value) -> Self {
        cache_key(project_id, query_type, params)
    }

    pub fn for_query(query: &AggregationQuery) -> Self {
        cache_key(query.project_id(), query.query_type(), &query.params_json())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash the canonical JSON of `{"project_id", "type", "params"}`.
pub fn cache_key(project_id: &str, query_type: &str, params: &Value) -> CacheKey {
    let envelope = json!({
        "project_id": project_id,
        "type": query_type,
        "params": params,
    });
    let digest = sha256_hex(canonical_json(&envelope).as_bytes());
    CacheKey(format!("{}{}", CACHE_KEY_PREFIX, digest))
}

/// Compact JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    sort_keys(value).to_string()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            // Sorted explicitly so the output holds with or without `preserve_order`.
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_keys(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_has_prefix_and_digest() {
        let key = cache_key("default", "trend", &json!({"event": "signup"}));
        assert!(key.as_str().starts_with(CACHE_KEY_PREFIX));
        assert_eq!(key.as_str().len(), CACHE_KEY_PREFIX.len() + 64);
    }

    #[test]
    fn test_key_order_independent() {
        let a: Value =
            serde_json::from_str(r#"{"event":"e","nested":{"x":1,"y":[{"b":2,"a":1}]}}"#).unwrap();
        let b: Value =
            serde_json::from_str(r#"{"nested":{"y":[{"a":1,"b":2}],"x":1},"event":"e"}"#).unwrap();
        assert_eq!(cache_key("p", "trend", &a), cache_key("p", "trend", &b));
    }

    #[test]
    fn test_key_distinguishes_project_and_type() {
        let params = json!({"event": "e"});
        assert_ne!(cache_key("p", "trend", &params), cache_key("q", "trend", &params));
        assert_ne!(cache_key("p", "trend", &params), cache_key("p", "funnel", &params));
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = json!({"steps": ["a", "b"]});
        let b = json!({"steps": ["b", "a"]});
        assert_ne!(cache_key("p", "funnel", &a), cache_key("p", "funnel", &b));
    }

    #[test]
    fn test_canonical_json_sorted() {
        let value = json!({"b": 1, "a": {"d": 2, "c": 3}});
        assert_eq!(canonical_json(&value), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }
}

//! Property-Based Tests for Ingress Validation
//!
//! **Property 1: Bounded Properties Acceptance**
//!
//! For any properties map, the validator SHALL accept it exactly when it has
//! at most 50 keys, nesting depth at most 3 and a compact serialization of at
//! most 32 KB, and SHALL reject it with a validation error otherwise.
//!
//! **Property 2: Normalization Fills Defaults**
//!
//! For any well-formed single event, normalization SHALL yield one canonical
//! event keyed by its distinct_id, with caller fields preserved and defaults
//! filled for everything omitted.

use beacon_core::{
    check_properties, IngestContext, IngestLimits, IngressValidator, PropertiesViolation,
};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

// ============================================================================
// PROPERTY TEST STRATEGIES
// ============================================================================

/// Nested object of exactly `depth` levels.
fn nested(depth: usize) -> Value {
    let mut value = Value::Object(Map::new());
    for level in 1..depth {
        let mut parent = Map::new();
        parent.insert(format!("l{}", level), value);
        value = Value::Object(parent);
    }
    value
}

fn flat_map(keys: usize) -> Map<String, Value> {
    (0..keys).map(|i| (format!("k{}", i), json!(i))).collect()
}

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_$ .-]{1,64}"
}

fn ctx() -> IngestContext {
    IngestContext::new(Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap())
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// **Property 1.1: Key Count Bound**
    #[test]
    fn prop_key_count_bound(keys in 0usize..120) {
        let limits = IngestLimits::default();
        let result = check_properties(&flat_map(keys), &limits);
        if keys <= limits.properties_max_keys {
            prop_assert!(result.is_ok());
        } else {
            let is_too_many = matches!(result, Err(PropertiesViolation::TooManyKeys { .. }));
            prop_assert!(is_too_many);
        }
    }

    /// **Property 1.2: Depth Bound**
    ///
    /// Arbitrarily deep input is rejected without unbounded recursion.
    #[test]
    fn prop_depth_bound(depth in 1usize..200) {
        let limits = IngestLimits::default();
        let value = nested(depth);
        let result = check_properties(value.as_object().unwrap(), &limits);
        if depth <= limits.properties_max_depth {
            prop_assert!(result.is_ok());
        } else {
            prop_assert_eq!(result, Err(PropertiesViolation::TooDeep { max: 3 }));
        }
    }

    /// **Property 1.3: Serialized Size Bound**
    #[test]
    fn prop_size_bound(len in 32_700usize..32_800) {
        let limits = IngestLimits::default();
        let value = json!({ "k": "x".repeat(len) });
        let size = serde_json::to_vec(&value).unwrap().len();
        let result = check_properties(value.as_object().unwrap(), &limits);
        prop_assert_eq!(result.is_ok(), size <= limits.properties_max_bytes);
    }

    /// **Property 2: Normalization Fills Defaults**
    #[test]
    fn prop_single_event_normalization(
        event in name_strategy(),
        distinct_id in name_strategy(),
        project in proptest::option::of("[a-z0-9_-]{1,32}"),
        with_timestamp in any::<bool>(),
    ) {
        let mut body = json!({ "event": event, "distinct_id": distinct_id });
        if let Some(project) = &project {
            body["project_id"] = json!(project);
        }
        if with_timestamp {
            body["timestamp"] = json!("2026-01-02T03:04:05Z");
        }

        let out = IngressValidator::default().normalize(&body, &ctx()).unwrap();
        prop_assert_eq!(out.len(), 1);
        let keyed = &out[0];
        prop_assert_eq!(&keyed.key, &distinct_id);
        prop_assert_eq!(&keyed.event.event, &event);
        prop_assert_eq!(
            keyed.event.project_id.as_str(),
            project.as_deref().unwrap_or("default")
        );
        let expected_ts = if with_timestamp {
            Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
        } else {
            ctx().received_at
        };
        prop_assert_eq!(keyed.event.timestamp, expected_ts);
    }

    /// **Property 2.1: Batch Keys Follow Subjects**
    ///
    /// Every event in a batch is keyed by its own distinct_id, in submission order.
    #[test]
    fn prop_batch_preserves_order_and_keys(ids in prop::collection::vec(name_strategy(), 1..100)) {
        let batch: Vec<Value> = ids
            .iter()
            .map(|id| json!({ "event": "step", "distinct_id": id }))
            .collect();
        let out = IngressValidator::default()
            .normalize(&json!({ "batch": batch }), &ctx())
            .unwrap();
        let keys: Vec<&String> = out.iter().map(|k| &k.key).collect();
        let expected: Vec<&String> = ids.iter().collect();
        prop_assert_eq!(keys, expected);
    }

    /// **Property 2.2: Length Caps Rejected**
    #[test]
    fn prop_overlong_names_rejected(extra in 1usize..16) {
        let body = json!({ "event": "e".repeat(4096 + extra), "distinct_id": "u1" });
        let err = IngressValidator::default().normalize(&body, &ctx()).unwrap_err();
        prop_assert_eq!(err.errors[0].field.as_str(), "event");
    }
}

#[test]
fn test_properties_exactly_at_every_limit_accepted() {
    let limits = IngestLimits::default();
    let mut map = flat_map(limits.properties_max_keys - 1);
    map.insert("deep".to_string(), nested(limits.properties_max_depth));
    assert_eq!(map.len(), limits.properties_max_keys);
    assert!(check_properties(&map, &limits).is_ok());
}

//! Ingress Validator & Normalizer
//!
//! Turns an untrusted capture body into canonical events. Two shapes are
//! accepted:
//!
//! - a single event object: `{"event": ..., "distinct_id": ..., ...}`
//! - a batch: `{"batch": [event, ...], "project_id": ...}` with 1..=100 events
//!
//! Checks run in order: body size, JSON syntax, object shape, required
//! fields, length bounds, properties bounds. The transform is pure; defaults
//! (random id, receive time) come from [`IngestContext`].

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::{
    IngestLimits, MAX_DEVICE_ID_CHARS, MAX_LIB_CHARS, MAX_LIB_VERSION_CHARS, MAX_NAME_CHARS,
    MAX_PROJECT_ID_CHARS,
};
use crate::error::{FieldError, IngestError, PropertiesViolation, ValidationError};
use crate::event::{parse_timestamp, CanonicalEvent, KeyedEvent};
use crate::{new_event_id, Timestamp, DEFAULT_PROJECT_ID};

/// Request-scoped inputs to normalization.
#[derive(Debug, Clone)]
pub struct IngestContext {
    /// Project resolved from a valid API key; overrides anything in the body.
    pub authenticated_project: Option<String>,
    /// Used when an event carries no parseable timestamp.
    pub received_at: Timestamp,
}

impl IngestContext {
    pub fn new(received_at: Timestamp) -> Self {
        Self {
            authenticated_project: None,
            received_at,
        }
    }

    pub fn with_project(mut self, project_id: Option<String>) -> Self {
        self.authenticated_project = project_id;
        self
    }
}

/// Validates and normalizes capture submissions.
#[derive(Debug, Clone, Default)]
pub struct IngressValidator {
    limits: IngestLimits,
}

impl IngressValidator {
    pub fn new(limits: IngestLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &IngestLimits {
        &self.limits
    }

    /// Size-check and parse a raw body, then normalize it.
    pub fn normalize_bytes(
        &self,
        body: &[u8],
        ctx: &IngestContext,
    ) -> Result<Vec<KeyedEvent>, IngestError> {
        if body.len() > self.limits.max_body_bytes {
            return Err(IngestError::BodyTooLarge {
                size: body.len(),
                limit: self.limits.max_body_bytes,
            });
        }
        let value: Value = serde_json::from_slice(body)
            .map_err(|_| ValidationError::message("Invalid JSON body"))?;
        Ok(self.normalize(&value, ctx)?)
    }

    /// Normalize an already-parsed body.
    pub fn normalize(
        &self,
        body: &Value,
        ctx: &IngestContext,
    ) -> Result<Vec<KeyedEvent>, ValidationError> {
        let Some(obj) = body.as_object() else {
            return Err(ValidationError::message("Body must be a JSON object"));
        };

        if obj.contains_key("batch") {
            return self.normalize_batch(obj, ctx);
        }

        let mut errors = Vec::new();
        let event = self.normalize_event(obj, "", None, ctx, &mut errors);
        match event {
            Some(event) if errors.is_empty() => Ok(vec![KeyedEvent::from(event)]),
            _ => Err(ValidationError::from_fields(errors)),
        }
    }

    fn normalize_batch(
        &self,
        obj: &Map<String, Value>,
        ctx: &IngestContext,
    ) -> Result<Vec<KeyedEvent>, ValidationError> {
        let mut errors = Vec::new();
        let default_project =
            optional_string(obj, "project_id", "project_id", MAX_PROJECT_ID_CHARS, &mut errors);

        let Some(items) = obj.get("batch").and_then(Value::as_array) else {
            return Err(ValidationError::from_fields(vec![FieldError::new(
                "batch",
                "must be a list of events",
            )]));
        };
        if items.is_empty() || items.len() > self.limits.max_batch_events {
            return Err(ValidationError::from_fields(vec![FieldError::new(
                "batch",
                format!(
                    "must contain between 1 and {} events, got {}",
                    self.limits.max_batch_events,
                    items.len()
                ),
            )]));
        }

        let mut events = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            let prefix = format!("batch[{}].", idx);
            let Some(item) = item.as_object() else {
                errors.push(FieldError::new(format!("batch[{}]", idx), "must be an object"));
                continue;
            };
            if let Some(event) =
                self.normalize_event(item, &prefix, default_project.as_deref(), ctx, &mut errors)
            {
                events.push(KeyedEvent::from(event));
            }
        }

        if errors.is_empty() {
            Ok(events)
        } else {
            Err(ValidationError::from_fields(errors))
        }
    }

    /// Validate one event object, pushing problems onto `errors`.
    fn normalize_event(
        &self,
        obj: &Map<String, Value>,
        prefix: &str,
        batch_project: Option<&str>,
        ctx: &IngestContext,
        errors: &mut Vec<FieldError>,
    ) -> Option<CanonicalEvent> {
        let before = errors.len();
        let path = |field: &str| format!("{}{}", prefix, field);

        let event = required_string(obj, "event", &path("event"), errors);
        let distinct_id = required_string(obj, "distinct_id", &path("distinct_id"), errors);

        let properties = match obj.get("properties") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => {
                if let Err(violation) = check_properties(map, &self.limits) {
                    errors.push(FieldError::new(path("properties"), violation.to_string()));
                }
                Some(map.clone())
            }
            Some(_) => {
                errors.push(FieldError::new(path("properties"), "must be an object"));
                None
            }
        };

        let uuid = match obj.get("uuid") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => match Uuid::parse_str(s) {
                Ok(id) => Some(id),
                Err(_) => {
                    errors.push(FieldError::new(path("uuid"), "must be a valid UUID"));
                    None
                }
            },
            Some(_) => {
                errors.push(FieldError::new(path("uuid"), "must be a valid UUID"));
                None
            }
        };

        let project_id =
            optional_string(obj, "project_id", &path("project_id"), MAX_PROJECT_ID_CHARS, errors);
        let lib = aliased_string(obj, "$lib", "lib", &path("$lib"), MAX_LIB_CHARS, errors);
        let lib_version = aliased_string(
            obj,
            "$lib_version",
            "lib_version",
            &path("$lib_version"),
            MAX_LIB_VERSION_CHARS,
            errors,
        );
        let device_id = aliased_string(
            obj,
            "$device_id",
            "device_id",
            &path("$device_id"),
            MAX_DEVICE_ID_CHARS,
            errors,
        );

        // Unparseable timestamps fall back to receive time rather than failing.
        let timestamp = match obj.get("timestamp") {
            Some(Value::String(s)) => parse_timestamp(s).unwrap_or(ctx.received_at),
            _ => ctx.received_at,
        };

        if errors.len() > before {
            return None;
        }

        let project_id = ctx
            .authenticated_project
            .clone()
            .or(project_id)
            .or_else(|| batch_project.map(str::to_string))
            .unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string());

        Some(CanonicalEvent {
            event: event?,
            distinct_id: distinct_id?,
            timestamp,
            properties,
            uuid: uuid.unwrap_or_else(new_event_id),
            project_id,
            lib,
            lib_version,
            device_id,
        })
    }
}

/// Check the properties bounds: key count, nesting depth, serialized size.
///
/// Depth is computed with a recursion budget of `max_depth + 1`, so arbitrarily
/// deep input never drives recursion past that bound.
pub fn check_properties(
    properties: &Map<String, Value>,
    limits: &IngestLimits,
) -> Result<(), PropertiesViolation> {
    if properties.len() > limits.properties_max_keys {
        return Err(PropertiesViolation::TooManyKeys {
            count: properties.len(),
            max: limits.properties_max_keys,
        });
    }

    if capped_depth(properties, limits.properties_max_depth + 1) > limits.properties_max_depth {
        return Err(PropertiesViolation::TooDeep {
            max: limits.properties_max_depth,
        });
    }

    let bytes = serde_json::to_vec(properties)
        .map(|b| b.len())
        .unwrap_or(usize::MAX);
    if bytes > limits.properties_max_bytes {
        return Err(PropertiesViolation::TooLarge {
            bytes,
            max: limits.properties_max_bytes,
        });
    }
    Ok(())
}

/// `min(depth(map), cap)` for `cap >= 1`. Arrays and scalars are leaves.
fn capped_depth(map: &Map<String, Value>, cap: usize) -> usize {
    if cap <= 1 {
        return 1;
    }
    let deepest_child = map
        .values()
        .filter_map(Value::as_object)
        .map(|child| capped_depth(child, cap - 1))
        .max()
        .unwrap_or(0);
    1 + deepest_child
}

fn required_string(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    match obj.get(key) {
        None | Some(Value::Null) => {
            errors.push(FieldError::new(path, "field required"));
            None
        }
        Some(Value::String(s)) if s.is_empty() => {
            errors.push(FieldError::new(path, "must not be empty"));
            None
        }
        Some(Value::String(s)) if s.chars().count() > MAX_NAME_CHARS => {
            errors.push(FieldError::new(
                path,
                format!("must be at most {} characters", MAX_NAME_CHARS),
            ));
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push(FieldError::new(path, "must be a string"));
            None
        }
    }
}

fn optional_string(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    max_chars: usize,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) if s.chars().count() > max_chars => {
            errors.push(FieldError::new(
                path,
                format!("must be at most {} characters", max_chars),
            ));
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push(FieldError::new(path, "must be a string"));
            None
        }
    }
}

fn aliased_string(
    obj: &Map<String, Value>,
    key: &str,
    alias: &str,
    path: &str,
    max_chars: usize,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    if obj.get(key).is_some_and(|v| !v.is_null()) {
        optional_string(obj, key, path, max_chars, errors)
    } else {
        optional_string(obj, alias, path, max_chars, errors)
    }
}

//! The per-flow record: typed request fields, free-form values and opaque
//! transport handles.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};

use crate::error::ContextError;

/// Keys under which the typed fields of a [`FlowContext`] are addressable
/// through the string-keyed `get`/`set` API.
pub mod keys {
    /// Flow (request) identifier. String.
    pub const FLOW_ID: &str = "flowId";
    /// Creation time in milliseconds since the Unix epoch. Unsigned integer.
    pub const START_TIME: &str = "startTime";
    /// Route or path the flow was entered through. String or null.
    pub const ROUTE: &str = "route";
    /// Transport method (e.g. HTTP verb). String or null.
    pub const METHOD: &str = "method";
    /// Milliseconds between flow start and completion. Unsigned integer or null.
    pub const REQUEST_DURATION: &str = "requestDuration";
    /// Reserved for the raw inbound transport handle.
    pub const REQUEST_HANDLE: &str = "req";
    /// Reserved for the raw outbound transport handle.
    pub const RESPONSE_HANDLE: &str = "res";

    /// Returns `true` for keys that can only hold opaque handles.
    #[must_use]
    pub fn is_handle_key(key: &str) -> bool {
        key == REQUEST_HANDLE || key == RESPONSE_HANDLE
    }
}

/// Opaque, shareable transport object stored alongside the context values.
pub type Handle = Arc<dyn Any + Send + Sync>;

/// The mutable record bound to one logical flow.
///
/// Known fields are typed; application data lives in a free-form side map of
/// JSON values. Both are reachable through [`FlowContext::get`] and
/// [`FlowContext::insert`] by key, so code that only knows key names keeps
/// working. Non-serializable transport objects go in a separate handle map.
#[derive(Clone)]
pub struct FlowContext {
    /// Unique identifier of the flow, used as the log correlation key.
    pub flow_id: String,
    /// Wall-clock creation time.
    pub start_time: SystemTime,
    /// Route or path the flow was entered through, if known.
    pub route: Option<String>,
    /// Transport method, if known.
    pub method: Option<String>,
    /// Duration recorded when the flow completed.
    pub duration_ms: Option<u64>,
    started_at: Instant,
    fields: HashMap<String, Value>,
    handles: HashMap<String, Handle>,
}

impl FlowContext {
    /// Creates a context stamped with the current time.
    #[must_use]
    pub fn new(flow_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            start_time: SystemTime::now(),
            route: None,
            method: None,
            duration_ms: None,
            started_at: Instant::now(),
            fields: HashMap::new(),
            handles: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Overrides the start time. Durations are measured from the new value.
    #[must_use]
    pub fn with_start_time(mut self, start_time: SystemTime) -> Self {
        self.restart_at(start_time);
        self
    }

    /// Adds a free-form value. Typed keys are routed to their fields and a
    /// value of the wrong shape for them is ignored.
    #[must_use]
    pub fn with_value(mut self, key: &str, value: impl Into<Value>) -> Self {
        let _ = self.insert(key, value.into());
        self
    }

    /// Start time as milliseconds since the Unix epoch.
    #[must_use]
    pub fn start_time_millis(&self) -> u64 {
        self.start_time
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    /// Milliseconds elapsed since the start time, from a monotonic clock.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Looks up a value by key, typed fields first.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            keys::FLOW_ID => Some(Value::String(self.flow_id.clone())),
            keys::START_TIME => Some(Value::from(self.start_time_millis())),
            keys::ROUTE => self.route.clone().map(Value::String),
            keys::METHOD => self.method.clone().map(Value::String),
            keys::REQUEST_DURATION => self.duration_ms.map(Value::from),
            _ => self.fields.get(key).cloned(),
        }
    }

    /// Inserts or overwrites a value by key.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::TypeMismatch`] when `key` names a typed field
    /// and `value` has the wrong shape, or when `key` is reserved for handles.
    /// The context is left unchanged in that case.
    pub fn insert(&mut self, key: &str, value: Value) -> Result<(), ContextError> {
        match key {
            keys::FLOW_ID => match value {
                Value::String(id) => self.flow_id = id,
                _ => return Err(mismatch(key, "a string")),
            },
            keys::START_TIME => {
                let start = value
                    .as_u64()
                    .and_then(|millis| UNIX_EPOCH.checked_add(Duration::from_millis(millis)))
                    .ok_or_else(|| mismatch(key, "an unsigned integer"))?;
                self.restart_at(start);
            }
            keys::ROUTE => self.route = optional_string(key, value)?,
            keys::METHOD => self.method = optional_string(key, value)?,
            keys::REQUEST_DURATION => {
                self.duration_ms = match value {
                    Value::Null => None,
                    other => Some(
                        other
                            .as_u64()
                            .ok_or_else(|| mismatch(key, "an unsigned integer or null"))?,
                    ),
                };
            }
            _ if keys::is_handle_key(key) => {
                return Err(mismatch(key, "an opaque handle"));
            }
            _ => {
                self.fields.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    /// Free-form application values, without the typed fields.
    #[must_use]
    pub fn fields(&self) -> &HashMap<String, Value> {
        &self.fields
    }

    /// Stores an opaque handle under `key`, replacing any previous one.
    pub fn insert_handle<T>(&mut self, key: impl Into<String>, handle: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        self.handles.insert(key.into(), handle);
    }

    /// Returns the handle under `key` if it exists and has type `T`.
    #[must_use]
    pub fn handle<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.handles
            .get(key)
            .and_then(|h| Arc::clone(h).downcast::<T>().ok())
    }

    #[must_use]
    pub fn has_handle(&self, key: &str) -> bool {
        self.handles.contains_key(key)
    }

    /// Renders every serializable value (typed and free-form) as a JSON object.
    /// Handles are omitted.
    #[must_use]
    pub fn to_json(&self) -> Map<String, Value> {
        let mut out: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for key in [
            keys::FLOW_ID,
            keys::START_TIME,
            keys::ROUTE,
            keys::METHOD,
            keys::REQUEST_DURATION,
        ] {
            if let Some(value) = self.get(key) {
                out.insert(key.to_string(), value);
            }
        }
        out
    }

    fn restart_at(&mut self, start_time: SystemTime) {
        let age = SystemTime::now()
            .duration_since(start_time)
            .unwrap_or_default();
        self.start_time = start_time;
        self.started_at = Instant::now().checked_sub(age).unwrap_or_else(Instant::now);
    }
}

fn mismatch(key: &str, expected: &'static str) -> ContextError {
    ContextError::TypeMismatch {
        key: key.to_string(),
        expected,
    }
}

fn optional_string(key: &str, value: Value) -> Result<Option<String>, ContextError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        _ => Err(mismatch(key, "a string or null")),
    }
}

// Handles are compared by identity; the monotonic start instant is derived
// from `start_time` and not compared.
impl PartialEq for FlowContext {
    fn eq(&self, other: &Self) -> bool {
        self.flow_id == other.flow_id
            && self.start_time == other.start_time
            && self.route == other.route
            && self.method == other.method
            && self.duration_ms == other.duration_ms
            && self.fields == other.fields
            && self.handles.len() == other.handles.len()
            && self.handles.iter().all(|(k, h)| {
                other
                    .handles
                    .get(k)
                    .is_some_and(|o| Arc::ptr_eq(h, o))
            })
    }
}

impl fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handle_keys: Vec<&String> = self.handles.keys().collect();
        handle_keys.sort();
        f.debug_struct("FlowContext")
            .field("flow_id", &self.flow_id)
            .field("start_time", &self.start_time_millis())
            .field("route", &self.route)
            .field("method", &self.method)
            .field("duration_ms", &self.duration_ms)
            .field("fields", &self.fields)
            .field("handles", &handle_keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_fields_are_readable_by_key() {
        let ctx = FlowContext::new("flow-1")
            .with_route("/users")
            .with_method("GET");

        assert_eq!(ctx.get(keys::FLOW_ID), Some(json!("flow-1")));
        assert_eq!(ctx.get(keys::ROUTE), Some(json!("/users")));
        assert_eq!(ctx.get(keys::METHOD), Some(json!("GET")));
        assert!(ctx.get(keys::START_TIME).is_some_and(|v| v.is_u64()));
        assert_eq!(ctx.get(keys::REQUEST_DURATION), None);
    }

    #[test]
    fn free_form_values_round_through_the_side_map() {
        let mut ctx = FlowContext::new("flow-1");
        ctx.insert("userId", json!("12345")).unwrap();
        ctx.insert("userId", json!("67890")).unwrap();

        assert_eq!(ctx.get("userId"), Some(json!("67890")));
        assert_eq!(ctx.fields().len(), 1);
        assert_eq!(ctx.get("missing"), None);
    }

    #[test]
    fn typed_field_rejects_wrong_shape_without_mutating() {
        let mut ctx = FlowContext::new("flow-1");

        let err = ctx.insert(keys::FLOW_ID, json!(42)).unwrap_err();
        assert!(matches!(err, ContextError::TypeMismatch { .. }));
        assert_eq!(ctx.flow_id, "flow-1");

        assert!(ctx.insert(keys::REQUEST_DURATION, json!(-3)).is_err());
        assert_eq!(ctx.duration_ms, None);
    }

    #[test]
    fn typed_field_accepts_null_to_clear() {
        let mut ctx = FlowContext::new("flow-1").with_route("/a");
        ctx.insert(keys::ROUTE, Value::Null).unwrap();
        assert_eq!(ctx.route, None);
    }

    #[test]
    fn handle_keys_are_reserved() {
        let mut ctx = FlowContext::new("flow-1");
        assert!(ctx.insert(keys::REQUEST_HANDLE, json!("nope")).is_err());
        assert!(!ctx.has_handle(keys::REQUEST_HANDLE));
    }

    #[test]
    fn handles_downcast_to_their_type() {
        let mut ctx = FlowContext::new("flow-1");
        ctx.insert_handle(keys::REQUEST_HANDLE, Arc::new(String::from("raw")));

        let raw: Option<Arc<String>> = ctx.handle(keys::REQUEST_HANDLE);
        assert_eq!(raw.as_deref().map(String::as_str), Some("raw"));
        assert!(ctx.handle::<u32>(keys::REQUEST_HANDLE).is_none());
    }

    #[test]
    fn start_time_override_moves_duration_origin() {
        let earlier = SystemTime::now() - Duration::from_secs(2);
        let ctx = FlowContext::new("flow-1").with_start_time(earlier);
        assert!(ctx.elapsed_ms() >= 2_000);
    }

    #[test]
    fn clones_compare_equal() {
        let mut ctx = FlowContext::new("flow-1").with_value("k", "v");
        ctx.insert_handle("res", Arc::new(1_u8));
        assert_eq!(ctx.clone(), ctx);
    }

    #[test]
    fn to_json_includes_typed_and_free_form_values() {
        let ctx = FlowContext::new("flow-1")
            .with_method("POST")
            .with_value("userRole", "admin");
        let json = ctx.to_json();

        assert_eq!(json["flowId"], "flow-1");
        assert_eq!(json["method"], "POST");
        assert_eq!(json["userRole"], "admin");
        assert!(!json.contains_key("route"));
    }
}

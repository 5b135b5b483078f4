//! Script values and host objects.
//!
//! `ScriptValue` is the evaluator's value tree: JSON plus opaque host
//! handles. A handle is the only thing a script can call out through, and
//! it serializes to a placeholder rather than exposing anything about the
//! host side.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{ScriptError, ScriptResult};

/// Placeholder used when a host handle leaks into serialized output.
pub const HANDLE_PLACEHOLDER: &str = "[sandbox handle]";

/// A shared host object reference.
pub type HostHandle = Arc<dyn HostObject>;

/// A capability handle callable from script.
///
/// Implementations dispatch `invoke` (the handle called as a function),
/// `call_method` (`handle.method(...)`), and `get_property`
/// (`handle.field`). Default implementations reject, so a handle only
/// exposes what it explicitly implements.
#[async_trait]
pub trait HostObject: Send + Sync {
    /// Short name used in error messages and placeholders.
    fn kind(&self) -> &'static str;

    /// Call the handle as a function.
    async fn invoke(&self, _args: Vec<ScriptValue>) -> ScriptResult<ScriptValue> {
        Err(ScriptError::runtime(format!(
            "{} is not callable",
            self.kind()
        )))
    }

    /// Call a method on the handle.
    async fn call_method(&self, method: &str, _args: Vec<ScriptValue>) -> ScriptResult<ScriptValue> {
        Err(ScriptError::runtime(format!(
            "{}.{method} is not a function",
            self.kind()
        )))
    }

    /// Read a property off the handle.
    fn get_property(&self, _name: &str) -> Option<ScriptValue> {
        None
    }
}

/// A value flowing through script evaluation.
#[derive(Clone, Default)]
pub enum ScriptValue {
    /// `null` / `undefined`
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Integer number
    Int(i64),
    /// Floating-point number
    Float(f64),
    /// String
    Str(String),
    /// Array
    Array(Vec<ScriptValue>),
    /// Object with insertion-ordered keys
    Object(IndexMap<String, ScriptValue>),
    /// Opaque capability handle
    Handle(HostHandle),
}

impl ScriptValue {
    /// Name of this value's type, for error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Float(_) => "number",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Handle(_) => "handle",
        }
    }

    /// JavaScript-style truthiness.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Float(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::Array(_) | Self::Object(_) | Self::Handle(_) => true,
        }
    }

    /// Build a value from JSON.
    #[must_use]
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n.as_i64().map_or_else(
                || Self::Float(n.as_f64().unwrap_or(f64::NAN)),
                Self::Int,
            ),
            Value::String(s) => Self::Str(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON. Host handles become [`HANDLE_PLACEHOLDER`]; a
    /// non-serializable value never crashes result normalization.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(n) => Value::from(*n),
            Self::Float(n) => serde_json::Number::from_f64(*n)
                .map_or(Value::Null, Value::Number),
            Self::Str(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Handle(_) => Value::String(HANDLE_PLACEHOLDER.to_string()),
        }
    }

    /// Render for log output: strings bare, everything else as compact
    /// JSON.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Handle(handle) => format!("[{}]", handle.kind()),
            other => other.to_json().to_string(),
        }
    }

    /// The string inside, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The integer inside, accepting exact floats.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            #[allow(clippy::float_cmp)]
            Self::Float(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }
}

impl PartialEq for ScriptValue {
    /// Structural equality; integers and floats compare numerically, host
    /// handles by identity.
    #[allow(clippy::float_cmp)]
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => *a as f64 == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Self::Handle(a), Self::Handle(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for ScriptValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(n) => write!(f, "Int({n})"),
            Self::Float(n) => write!(f, "Float({n})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Self::Object(map) => {
                let mut d = f.debug_map();
                for (k, v) in map {
                    d.entry(k, v);
                }
                d.finish()
            }
            Self::Handle(handle) => write!(f, "Handle({})", handle.kind()),
        }
    }
}

impl From<Value> for ScriptValue {
    fn from(value: Value) -> Self {
        Self::from_json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Marker;

    #[async_trait]
    impl HostObject for Marker {
        fn kind(&self) -> &'static str {
            "marker"
        }
    }

    #[test]
    fn json_round_trip_preserves_structure() {
        let json = json!({"a": 1, "b": [true, null, "x"], "c": {"d": 2.5}});
        let value = ScriptValue::from_json(json.clone());
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn object_key_order_is_preserved() {
        let value = ScriptValue::from_json(json!({"z": 1, "a": 2, "m": 3}));
        let ScriptValue::Object(map) = value else {
            panic!("expected object");
        };
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn handles_serialize_to_placeholder() {
        let value = ScriptValue::Handle(Arc::new(Marker));
        assert_eq!(value.to_json(), json!(HANDLE_PLACEHOLDER));
        assert_eq!(value.render(), "[marker]");
    }

    #[test]
    fn truthiness_follows_javascript() {
        assert!(!ScriptValue::Null.is_truthy());
        assert!(!ScriptValue::Int(0).is_truthy());
        assert!(!ScriptValue::Str(String::new()).is_truthy());
        assert!(ScriptValue::Array(vec![]).is_truthy());
        assert!(ScriptValue::Object(IndexMap::new()).is_truthy());
        assert!(ScriptValue::Str("x".into()).is_truthy());
    }

    #[test]
    fn numbers_compare_across_representations() {
        assert_eq!(ScriptValue::Int(3), ScriptValue::Float(3.0));
        assert_ne!(ScriptValue::Int(3), ScriptValue::Float(3.5));
        assert_ne!(ScriptValue::Int(3), ScriptValue::Str("3".into()));
    }

    #[test]
    fn render_keeps_strings_bare() {
        assert_eq!(ScriptValue::Str("plain".into()).render(), "plain");
        assert_eq!(ScriptValue::from_json(json!({"n": 1})).render(), r#"{"n":1}"#);
    }

    #[tokio::test]
    async fn host_object_defaults_reject() {
        let handle: HostHandle = Arc::new(Marker);
        assert!(handle.invoke(vec![]).await.is_err());
        assert!(handle.call_method("anything", vec![]).await.is_err());
        assert!(handle.get_property("anything").is_none());
    }
}

//! Payload values accepted by the redactor.
//!
//! `serde_json::Value` is a tree and cannot express shared or cyclic
//! structure. Callers that forward object graphs (e.g. request contexts that
//! reference themselves) use [`SharedValue`] nodes, which the redactor tracks
//! by pointer identity.

use serde_json::{Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A value that may appear in event metadata.
#[derive(Debug, Clone)]
pub enum PayloadValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<PayloadValue>),
    Object(BTreeMap<String, PayloadValue>),
    /// A node that may be referenced from several places, including itself
    Shared(SharedValue),
}

impl PayloadValue {
    /// Create an empty object.
    pub fn object() -> Self {
        PayloadValue::Object(BTreeMap::new())
    }

    /// Short, non-recursive description used when a value cannot be expanded.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            PayloadValue::Null => "null",
            PayloadValue::Bool(_) => "bool",
            PayloadValue::Number(_) => "number",
            PayloadValue::String(_) => "string",
            PayloadValue::Array(_) => "array",
            PayloadValue::Object(_) => "object",
            PayloadValue::Shared(_) => "shared",
        }
    }
}

impl Default for PayloadValue {
    fn default() -> Self {
        PayloadValue::Null
    }
}

/// A reference-counted payload node.
///
/// Clones share the same node; two `SharedValue`s are "the same object" when
/// they point at the same allocation.
///
/// ```
/// use donation_guard::domain::redaction::{PayloadValue, SharedValue};
///
/// let node = SharedValue::new(PayloadValue::object());
/// node.insert("parent", PayloadValue::Shared(node.clone()));
/// assert_eq!(node.id(), node.clone().id());
/// ```
#[derive(Clone)]
pub struct SharedValue(Arc<Mutex<PayloadValue>>);

impl SharedValue {
    pub fn new(value: PayloadValue) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    /// Identity of the underlying allocation.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Replace the node's value.
    pub fn set(&self, value: PayloadValue) {
        if let Ok(mut guard) = self.0.lock() {
            *guard = value;
        }
    }

    /// Insert a key if the node holds an object. Other node kinds are left untouched.
    pub fn insert(&self, key: impl Into<String>, value: PayloadValue) {
        if let Ok(mut guard) = self.0.lock() {
            if let PayloadValue::Object(map) = &mut *guard {
                map.insert(key.into(), value);
            }
        }
    }

    /// Push an item if the node holds an array.
    pub fn push(&self, value: PayloadValue) {
        if let Ok(mut guard) = self.0.lock() {
            if let PayloadValue::Array(items) = &mut *guard {
                items.push(value);
            }
        }
    }

    /// Run `f` against the node's value. Returns `None` if the lock is poisoned.
    pub(crate) fn with_value<R>(&self, f: impl FnOnce(&PayloadValue) -> R) -> Option<R> {
        self.0.lock().ok().map(|guard| f(&guard))
    }
}

// Never recurse: the node may contain itself.
impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedValue({:#x})", self.id())
    }
}

impl From<Value> for PayloadValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => PayloadValue::Null,
            Value::Bool(b) => PayloadValue::Bool(b),
            Value::Number(n) => PayloadValue::Number(n),
            Value::String(s) => PayloadValue::String(s),
            Value::Array(items) => PayloadValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                PayloadValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue::String(value.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        PayloadValue::String(value)
    }
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        PayloadValue::Bool(value)
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        PayloadValue::Number(value.into())
    }
}

impl From<u64> for PayloadValue {
    fn from(value: u64) -> Self {
        PayloadValue::Number(value.into())
    }
}

impl From<f64> for PayloadValue {
    fn from(value: f64) -> Self {
        Number::from_f64(value)
            .map(PayloadValue::Number)
            .unwrap_or(PayloadValue::Null)
    }
}

impl From<SharedValue> for PayloadValue {
    fn from(value: SharedValue) -> Self {
        PayloadValue::Shared(value)
    }
}

impl<T: Into<PayloadValue>> From<Vec<T>> for PayloadValue {
    fn from(items: Vec<T>) -> Self {
        PayloadValue::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, PayloadValue>> for PayloadValue {
    fn from(map: BTreeMap<String, PayloadValue>) -> Self {
        PayloadValue::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_preserves_structure() {
        let value = PayloadValue::from(json!({"a": [1, "two", null], "b": {"c": true}}));
        let PayloadValue::Object(map) = value else {
            panic!("expected object");
        };
        assert!(matches!(map.get("a"), Some(PayloadValue::Array(items)) if items.len() == 3));
        assert!(matches!(map.get("b"), Some(PayloadValue::Object(_))));
    }

    #[test]
    fn test_non_finite_float_becomes_null() {
        assert!(matches!(PayloadValue::from(f64::NAN), PayloadValue::Null));
        assert!(matches!(PayloadValue::from(1.5), PayloadValue::Number(_)));
    }

    #[test]
    fn test_shared_identity_and_debug_do_not_recurse() {
        let node = SharedValue::new(PayloadValue::object());
        node.insert("self", PayloadValue::Shared(node.clone()));

        let other = SharedValue::new(PayloadValue::object());
        assert_ne!(node.id(), other.id());

        let rendered = format!("{:?}", PayloadValue::Shared(node.clone()));
        assert!(rendered.starts_with("Shared(SharedValue(0x"));
    }

    #[test]
    fn test_insert_ignores_non_objects() {
        let node = SharedValue::new(PayloadValue::Array(vec![]));
        node.insert("key", PayloadValue::Null);
        node.push(PayloadValue::Bool(true));
        let len = node.with_value(|v| match v {
            PayloadValue::Array(items) => items.len(),
            _ => 0,
        });
        assert_eq!(len, Some(1));
    }
}

//! Payload redaction.
//!
//! The [`Redactor`] strips secrets and PII from arbitrary nested payloads
//! while bounding their size:
//!
//! - object keys matching the [`KeyPolicy`] are replaced wholesale
//! - strings are rewritten by every [`ValueDetector`], then truncated
//! - containers deeper than `max_depth` collapse to a marker
//! - objects and arrays are capped, with the number of omitted entries recorded
//! - a shared node visited twice in one call becomes a circular marker
//!
//! Redaction is pure and never panics outward. If the walk fails for any
//! reason the result degrades to a scrubbed string description of the input.
//!
//! ```
//! use donation_guard::domain::redaction::{PayloadValue, Redactor};
//! use serde_json::json;
//!
//! let redactor = Redactor::default();
//! let payload = PayloadValue::from(json!({
//!     "authorization": "Bearer abc.def.ghi",
//!     "note": "ok",
//! }));
//! let redacted = redactor.redact(&payload);
//! assert_eq!(redacted, json!({"authorization": "[REDACTED]", "note": "ok"}));
//! ```

pub mod detectors;
pub mod keys;
pub mod value;

pub use detectors::{
    default_detectors, BearerTokenDetector, EmailDetector, PhoneDetector,
    SecretAssignmentDetector, ValueDetector,
};
pub use keys::{KeyPattern, KeyPolicy};
pub use value::{PayloadValue, SharedValue};

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Replacement for values under sensitive keys.
pub const REDACTED: &str = "[REDACTED]";
/// Replacement for a shared node seen twice in one call.
pub const CIRCULAR: &str = "[Circular]";
/// Replacement for containers beyond the depth limit.
pub const MAX_DEPTH: &str = "[MaxDepth]";
/// Replacement for a string that could not be scrubbed.
pub const UNSERIALIZABLE: &str = "[Unserializable]";
/// Object key under which the number of dropped keys is recorded.
pub const OMITTED_KEY: &str = "__omitted";

/// Size and depth bounds applied during redaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedactionLimits {
    /// Containers at this depth or deeper are replaced by [`MAX_DEPTH`]
    pub max_depth: usize,
    /// Strings longer than this (in chars) are truncated
    pub max_string_len: usize,
    /// Maximum keys kept per object
    pub max_keys: usize,
    /// Maximum items kept per array
    pub max_items: usize,
}

impl Default for RedactionLimits {
    fn default() -> Self {
        Self {
            max_depth: 6,
            max_string_len: 2_000,
            max_keys: 50,
            max_items: 50,
        }
    }
}

/// Redacts payloads according to a key policy, value detectors and limits.
#[derive(Debug, Clone)]
pub struct Redactor {
    limits: RedactionLimits,
    keys: KeyPolicy,
    detectors: Vec<Arc<dyn ValueDetector>>,
}

impl Redactor {
    /// Create a redactor with the default key policy and detectors.
    pub fn new(limits: RedactionLimits) -> Self {
        Self {
            limits,
            keys: KeyPolicy::default(),
            detectors: default_detectors(),
        }
    }

    /// Replace the key policy.
    pub fn with_key_policy(mut self, keys: KeyPolicy) -> Self {
        self.keys = keys;
        self
    }

    /// Append a detector; it runs after the existing ones.
    pub fn with_detector(mut self, detector: Arc<dyn ValueDetector>) -> Self {
        self.detectors.push(detector);
        self
    }

    pub fn limits(&self) -> &RedactionLimits {
        &self.limits
    }

    pub fn key_policy(&self) -> &KeyPolicy {
        &self.keys
    }

    /// Redact a payload.
    ///
    /// Each call gets its own visited set, so identity tracking never leaks
    /// between calls.
    pub fn redact(&self, value: &PayloadValue) -> Value {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut visited = HashSet::new();
            self.walk(value, 0, &mut visited)
        }));
        result.unwrap_or_else(|_| Value::String(self.coerce(value)))
    }

    /// Scrub a string with every detector, then truncate it.
    pub fn redact_str(&self, input: &str) -> String {
        let scrubbed = self.scrub(input);
        truncate_with_marker(&scrubbed, self.limits.max_string_len)
    }

    /// Scrub a string with every detector without truncating it.
    pub fn scrub(&self, input: &str) -> String {
        self.detectors
            .iter()
            .fold(input.to_string(), |acc, detector| {
                detector.redact(&acc).into_owned()
            })
    }

    fn walk(&self, value: &PayloadValue, depth: usize, visited: &mut HashSet<usize>) -> Value {
        match value {
            PayloadValue::Null => Value::Null,
            PayloadValue::Bool(b) => Value::Bool(*b),
            PayloadValue::Number(n) => Value::Number(n.clone()),
            PayloadValue::String(s) => Value::String(self.redact_str(s)),
            PayloadValue::Array(items) => {
                if depth >= self.limits.max_depth {
                    return Value::String(MAX_DEPTH.to_string());
                }
                let mut out: Vec<Value> = items
                    .iter()
                    .take(self.limits.max_items)
                    .map(|item| self.walk(item, depth + 1, visited))
                    .collect();
                let omitted = items.len().saturating_sub(self.limits.max_items);
                if omitted > 0 {
                    out.push(Value::String(format!("[+{} more items]", omitted)));
                }
                Value::Array(out)
            }
            PayloadValue::Object(map) => {
                if depth >= self.limits.max_depth {
                    return Value::String(MAX_DEPTH.to_string());
                }
                let mut out = Map::new();
                for (key, item) in map.iter().take(self.limits.max_keys) {
                    let redacted = if self.keys.is_sensitive(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        self.walk(item, depth + 1, visited)
                    };
                    out.insert(truncate_with_marker(key, self.limits.max_string_len), redacted);
                }
                let omitted = map.len().saturating_sub(self.limits.max_keys);
                if omitted > 0 {
                    out.insert(OMITTED_KEY.to_string(), Value::from(omitted));
                }
                Value::Object(out)
            }
            PayloadValue::Shared(node) => {
                if !visited.insert(node.id()) {
                    return Value::String(CIRCULAR.to_string());
                }
                node.with_value(|inner| self.walk(inner, depth, visited))
                    .unwrap_or_else(|| Value::String(format!("[Unreadable {}]", value.kind())))
            }
        }
    }

    /// Best-effort, non-recursive string form of a value.
    fn coerce(&self, value: &PayloadValue) -> String {
        match value {
            PayloadValue::Null => "null".to_string(),
            PayloadValue::Bool(b) => b.to_string(),
            PayloadValue::Number(n) => n.to_string(),
            PayloadValue::String(s) => {
                panic::catch_unwind(AssertUnwindSafe(|| self.redact_str(s)))
                    .unwrap_or_else(|_| UNSERIALIZABLE.to_string())
            }
            other => format!("[{}]", other.kind()),
        }
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(RedactionLimits::default())
    }
}

/// Truncate to `max_chars` characters, appending a marker with the dropped count.
pub fn truncate_with_marker(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        None => input.to_string(),
        Some((cut, _)) => {
            let dropped = input[cut..].chars().count();
            format!("{}…[truncated {} chars]", &input[..cut], dropped)
        }
    }
}

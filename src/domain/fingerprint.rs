//! Fingerprint computation for error deduplication.
//!
//! A fingerprint identifies a class of error events based on:
//! - Route (default `unknown`)
//! - HTTP method, upper-cased (default `UNKNOWN`)
//! - Error code (default `none`)
//! - Message, with volatile tokens normalized, truncated to 220 chars
//! - First line of the stack trace, truncated to 220 chars
//!
//! No other field participates. Fingerprints are SHA-256 digests rendered as
//! 64 lowercase hex chars, so they are stable across processes and releases
//! and can be compared by peers reading the shared store.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;

/// Maximum chars of message and stack line that participate.
pub const MAX_COMPONENT_CHARS: usize = 220;

const FIELD_SEPARATOR: char = '\u{1f}';

static UUID_REGEX: OnceLock<Regex> = OnceLock::new();
static HEX_REGEX: OnceLock<Regex> = OnceLock::new();
static NUMBER_REGEX: OnceLock<Regex> = OnceLock::new();

fn uuid_regex() -> &'static Regex {
    UUID_REGEX.get_or_init(|| {
        Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
            .expect("uuid regex")
    })
}

fn hex_regex() -> &'static Regex {
    HEX_REGEX.get_or_init(|| Regex::new(r"(?i)\b[0-9a-f]{16,}\b").expect("hex regex"))
}

fn number_regex() -> &'static Regex {
    NUMBER_REGEX.get_or_init(|| Regex::new(r"\b\d{4,}\b").expect("number regex"))
}

/// A stable identity hash for a class of error events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute a fingerprint from its components.
    ///
    /// ```
    /// use donation_guard::domain::fingerprint::Fingerprint;
    ///
    /// let a = Fingerprint::compute(Some("/api/donors"), Some("post"), None,
    ///     "request 9f1c2d3e-0000-4000-8000-00000000abcd failed", None);
    /// let b = Fingerprint::compute(Some("/api/donors"), Some("POST"), Some("none"),
    ///     "request 1b2c3d4e-1111-4111-8111-11111111ef01 failed", None);
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str().len(), 64);
    /// ```
    pub fn compute(
        route: Option<&str>,
        method: Option<&str>,
        code: Option<&str>,
        message: &str,
        stack: Option<&str>,
    ) -> Self {
        let route = non_blank(route).unwrap_or("unknown");
        let method = non_blank(method)
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let code = non_blank(code).unwrap_or("none");
        let message = truncate(&normalize_volatile(message.trim()), MAX_COMPONENT_CHARS);
        let stack_line = stack
            .and_then(|s| s.lines().next())
            .map(|line| truncate(line.trim(), MAX_COMPONENT_CHARS))
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        for (i, part) in [route, method.as_str(), code, message.as_str(), stack_line.as_str()]
            .iter()
            .enumerate()
        {
            if i > 0 {
                let mut buf = [0u8; 4];
                hasher.update(FIELD_SEPARATOR.encode_utf8(&mut buf).as_bytes());
            }
            hasher.update(part.as_bytes());
        }
        Fingerprint(to_hex(&hasher.finalize()))
    }

    /// Wrap an already computed fingerprint, e.g. one read back from storage.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Fingerprint(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Replace request-specific tokens with placeholders.
///
/// UUIDs, long hex ids and numbers of four or more digits vary between
/// otherwise identical failures.
pub fn normalize_volatile(message: &str) -> String {
    let message = uuid_regex().replace_all(message, "<uuid>");
    let message = hex_regex().replace_all(&message, "<hex>");
    number_regex().replace_all(&message, "<n>").into_owned()
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_inputs_produce_same_fingerprint() {
        let a = Fingerprint::compute(Some("/a"), Some("GET"), Some("E1"), "boom", Some("Error: boom"));
        let b = Fingerprint::compute(Some("/a"), Some("GET"), Some("E1"), "boom", Some("Error: boom"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_each_component_participates() {
        let base = Fingerprint::compute(Some("/a"), Some("GET"), Some("E1"), "boom", Some("at x"));
        let variants = [
            Fingerprint::compute(Some("/b"), Some("GET"), Some("E1"), "boom", Some("at x")),
            Fingerprint::compute(Some("/a"), Some("POST"), Some("E1"), "boom", Some("at x")),
            Fingerprint::compute(Some("/a"), Some("GET"), Some("E2"), "boom", Some("at x")),
            Fingerprint::compute(Some("/a"), Some("GET"), Some("E1"), "bang", Some("at x")),
            Fingerprint::compute(Some("/a"), Some("GET"), Some("E1"), "boom", Some("at y")),
        ];
        for variant in variants {
            assert_ne!(base, variant);
        }
    }

    #[test]
    fn test_defaults_match_explicit_placeholders() {
        let implicit = Fingerprint::compute(None, None, None, "boom", None);
        let explicit =
            Fingerprint::compute(Some("unknown"), Some("unknown"), Some("none"), "boom", None);
        assert_eq!(implicit, explicit);
        assert_eq!(implicit, Fingerprint::compute(Some("  "), Some(""), Some(" "), "boom", None));
    }

    #[test]
    fn test_only_first_stack_line_counts() {
        let a = Fingerprint::compute(None, None, None, "boom", Some("Error: boom\n    at a (x.js:1:1)"));
        let b = Fingerprint::compute(None, None, None, "boom", Some("Error: boom\n    at b (y.js:9:9)"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_long_messages_truncated_before_hashing() {
        let prefix = "x".repeat(MAX_COMPONENT_CHARS);
        let a = Fingerprint::compute(None, None, None, &format!("{prefix}tail one"), None);
        let b = Fingerprint::compute(None, None, None, &format!("{prefix}tail two"), None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_separator_prevents_component_shifting() {
        let a = Fingerprint::compute(Some("/ab"), Some("GET"), None, "c", None);
        let b = Fingerprint::compute(Some("/a"), Some("GET"), None, "bc", None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_normalize_volatile_tokens() {
        assert_eq!(
            normalize_volatile("req 123e4567-e89b-12d3-a456-426614174000 failed"),
            "req <uuid> failed"
        );
        assert_eq!(normalize_volatile("doc 5f8d0a3b9c7e6f1a2b3c failed"), "doc <hex> failed");
        assert_eq!(normalize_volatile("donor 48213 not found"), "donor <n> not found");
        assert_eq!(normalize_volatile("retry 3 of 5"), "retry 3 of 5");
    }
}

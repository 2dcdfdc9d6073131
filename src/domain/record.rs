//! Redacted payloads and the persisted error record.

use crate::domain::event::{Level, LogEvent, Scope, Source};
use crate::domain::fingerprint::Fingerprint;
use crate::domain::redaction::{PayloadValue, Redactor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field holding a record's fingerprint.
pub const FINGERPRINT_FIELD: &str = "fingerprint";
/// Field holding a record's creation time in epoch milliseconds.
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Field holding the source that reported a record.
pub const SOURCE_FIELD: &str = "source";

/// A [`LogEvent`] with every value redacted.
#[derive(Debug, Clone, PartialEq)]
pub struct RedactedPayload {
    pub level: Level,
    pub message: String,
    pub code: Option<String>,
    pub route: Option<String>,
    pub method: Option<String>,
    pub stack: Option<String>,
    pub error_name: Option<String>,
    pub error_message: Option<String>,
    pub actor_id: Option<String>,
    pub actor_role: Option<String>,
    pub metadata: Value,
}

impl RedactedPayload {
    /// Redact every field of an event.
    pub fn from_event(event: &LogEvent, redactor: &Redactor) -> Self {
        let scrub = |value: Option<&str>| value.map(|v| redactor.redact_str(v));
        Self {
            level: event.level,
            message: redactor.redact_str(event.effective_message()),
            code: scrub(event.code()),
            route: scrub(event.route.as_deref()),
            method: event
                .method
                .as_deref()
                .map(|m| redactor.redact_str(&m.to_ascii_uppercase())),
            stack: scrub(event.stack()),
            error_name: scrub(event.error_name()),
            error_message: scrub(event.error_message()),
            actor_id: scrub(event.actor_id.as_deref()),
            actor_role: scrub(event.actor_role.as_deref()),
            metadata: redactor.redact(&PayloadValue::Object(event.metadata.clone())),
        }
    }

    /// Fingerprint of the redacted fields.
    ///
    /// Events that differ only in redacted secrets share a fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(
            self.route.as_deref(),
            self.method.as_deref(),
            self.code.as_deref(),
            &self.message,
            self.stack.as_deref(),
        )
    }
}

/// An error record as written to the store. Records are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedLogRecord {
    pub source: Source,
    pub scope: Scope,
    pub level: Level,
    pub message: String,
    pub code: Option<String>,
    pub route: Option<String>,
    pub method: Option<String>,
    pub stack: Option<String>,
    pub fingerprint: Fingerprint,
    pub metadata: Value,
    pub actor_id: Option<String>,
    pub actor_role: Option<String>,
    pub error_name: Option<String>,
    pub error_message: Option<String>,
    pub created_at: u64,
}

impl PersistedLogRecord {
    pub fn new(
        payload: RedactedPayload,
        fingerprint: Fingerprint,
        scope: Scope,
        source: Source,
        created_at: u64,
    ) -> Self {
        Self {
            source,
            scope,
            level: payload.level,
            message: payload.message,
            code: payload.code,
            route: payload.route,
            method: payload.method,
            stack: payload.stack,
            fingerprint,
            metadata: payload.metadata,
            actor_id: payload.actor_id,
            actor_role: payload.actor_role,
            error_name: payload.error_name,
            error_message: payload.error_message,
            created_at,
        }
    }

    pub fn to_document(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Read the creation time of a stored record, if it has one.
pub fn created_at(document: &Value) -> Option<u64> {
    document.get(CREATED_AT_FIELD).and_then(Value::as_u64)
}

/// Whether a stored record was reported by `source`.
pub fn is_from(document: &Value, source: Source) -> bool {
    document.get(SOURCE_FIELD).and_then(Value::as_str) == Some(source.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::ErrorDetails;
    use serde_json::json;

    #[test]
    fn test_payload_redacts_every_field() {
        let event = LogEvent::error("login failed for bob@example.com")
            .with_route("/api/auth/callback?access_token=abc123")
            .with_method("post")
            .with_stack("Error: Bearer abc.def at handler")
            .with_actor("uid-1", "donor")
            .with_metadata("password", "hunter2")
            .with_metadata("attempt", 3_u64);

        let payload = RedactedPayload::from_event(&event, &Redactor::default());
        assert_eq!(payload.message, "login failed for [REDACTED_EMAIL]");
        assert_eq!(
            payload.route.as_deref(),
            Some("/api/auth/callback?access_token=[REDACTED]")
        );
        assert_eq!(payload.method.as_deref(), Some("POST"));
        assert_eq!(payload.stack.as_deref(), Some("Error: Bearer [REDACTED_TOKEN] at handler"));
        assert_eq!(payload.metadata, json!({"attempt": 3, "password": "[REDACTED]"}));
    }

    #[test]
    fn test_error_message_kept_alongside_event_message() {
        let event = LogEvent::error("Failed to book appointment").with_error(ErrorDetails {
            name: Some("FirebaseError".to_string()),
            message: Some("quota exceeded for carol@example.com".to_string()),
            ..ErrorDetails::default()
        });
        let payload = RedactedPayload::from_event(&event, &Redactor::default());
        assert_eq!(payload.message, "Failed to book appointment");
        assert_eq!(
            payload.error_message.as_deref(),
            Some("quota exceeded for [REDACTED_EMAIL]")
        );

        let record = PersistedLogRecord::new(
            payload,
            Fingerprint::from_hex("cd".repeat(32)),
            Scope::Request,
            Source::Client,
            1,
        );
        let doc = record.to_document().unwrap();
        assert_eq!(doc["errorMessage"], "quota exceeded for [REDACTED_EMAIL]");
        assert_eq!(doc["errorName"], "FirebaseError");
    }

    #[test]
    fn test_fingerprint_uses_redacted_fields() {
        let event = LogEvent::error("boom")
            .with_route("/api/donors")
            .with_method("post")
            .with_code("E1")
            .with_stack("Error: boom\n  at x");
        let payload = RedactedPayload::from_event(&event, &Redactor::default());
        let expected = Fingerprint::compute(
            Some("/api/donors"),
            Some("POST"),
            Some("E1"),
            "boom",
            Some("Error: boom"),
        );
        assert_eq!(payload.fingerprint(), expected);
    }

    #[test]
    fn test_events_differing_only_in_secrets_share_fingerprint() {
        let redactor = Redactor::default();
        let fingerprint = |event: LogEvent| RedactedPayload::from_event(&event, &redactor).fingerprint();

        let alice = fingerprint(LogEvent::error("login failed for alice@example.com").with_route("/api/auth/login"));
        let bob = fingerprint(LogEvent::error("login failed for bob@example.org").with_route("/api/auth/login"));
        assert_eq!(alice, bob);

        let first = fingerprint(LogEvent::error("callback failed").with_route("/api/auth/cb?access_token=AAA111"));
        let second = fingerprint(LogEvent::error("callback failed").with_route("/api/auth/cb?access_token=BBB222"));
        assert_eq!(first, second);

        let other = fingerprint(LogEvent::error("signup failed for bob@example.org").with_route("/api/auth/login"));
        assert_ne!(alice, other);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let payload = RedactedPayload::from_event(&LogEvent::error("boom"), &Redactor::default());
        let record = PersistedLogRecord::new(
            payload,
            Fingerprint::from_hex("ab".repeat(32)),
            Scope::General,
            Source::Client,
            1_700_000_000_000,
        );
        let doc = record.to_document().unwrap();
        assert_eq!(doc["source"], "client");
        assert_eq!(doc["scope"], "general");
        assert_eq!(doc["level"], "error");
        assert_eq!(doc[FINGERPRINT_FIELD], "ab".repeat(32));
        assert_eq!(created_at(&doc), Some(1_700_000_000_000));
        assert!(is_from(&doc, Source::Client));
        assert!(!is_from(&doc, Source::Server));
        assert!(doc.get("actorId").is_some());
        assert!(doc.get("errorName").is_some());
        assert!(doc.get("errorMessage").is_some());

        let back: PersistedLogRecord = serde_json::from_value(doc).unwrap();
        assert_eq!(back, record);
    }
}

//! Log events handed to the telemetry pipeline by outer handlers.
//!
//! A [`LogEvent`] is ephemeral: it is built per call, redacted, fingerprinted
//! and then discarded. Only its redacted projection is ever persisted.

use crate::domain::redaction::PayloadValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    #[default]
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which call site produced a record.
///
/// Client-originated errors and the backend's own request logging share one
/// pipeline; the source tells them apart in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Errors reported by browsers and mobile clients.
    Client,
    /// Errors raised inside the serverless handlers themselves.
    Server,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Client => "client",
            Source::Server => "server",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain area an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Donor,
    Ngo,
    Bloodbank,
    Admin,
    Auth,
    Campaign,
    Request,
    General,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Donor => "donor",
            Scope::Ngo => "ngo",
            Scope::Bloodbank => "bloodbank",
            Scope::Admin => "admin",
            Scope::Auth => "auth",
            Scope::Campaign => "campaign",
            Scope::Request => "request",
            Scope::General => "general",
        }
    }

    /// Infer a scope from a route by matching its path segments.
    ///
    /// The first segment that names a known area wins, so
    /// `/api/admin/donors` is an admin error. Query strings and fragments are
    /// ignored. Unknown or missing routes map to [`Scope::General`].
    ///
    /// ```
    /// use donation_guard::domain::event::Scope;
    ///
    /// assert_eq!(Scope::infer(Some("/api/bloodbanks/42/stock")), Scope::Bloodbank);
    /// assert_eq!(Scope::infer(Some("/api/auth/login?next=/")), Scope::Auth);
    /// assert_eq!(Scope::infer(None), Scope::General);
    /// ```
    pub fn infer(route: Option<&str>) -> Scope {
        let Some(route) = route else {
            return Scope::General;
        };
        let path = route.split(['?', '#']).next().unwrap_or_default();

        path.split('/')
            .filter(|segment| !segment.is_empty())
            .find_map(|segment| Self::from_segment(&segment.to_ascii_lowercase()))
            .unwrap_or(Scope::General)
    }

    fn from_segment(segment: &str) -> Option<Scope> {
        let scope = match segment {
            "donor" | "donors" | "donations" => Scope::Donor,
            "ngo" | "ngos" => Scope::Ngo,
            "bloodbank" | "bloodbanks" | "blood-banks" | "blood_banks" => Scope::Bloodbank,
            "admin" | "admins" | "impersonate" => Scope::Admin,
            "auth" | "login" | "logout" | "signup" | "register" | "session" => Scope::Auth,
            "campaign" | "campaigns" | "drives" => Scope::Campaign,
            "request" | "requests" | "appointment" | "appointments" => Scope::Request,
            _ => return None,
        };
        Some(scope)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error details attached to an event.
#[derive(Debug, Clone, Default)]
pub struct ErrorDetails {
    /// Error class or type name (e.g. `TypeError`, `FirebaseError`)
    pub name: Option<String>,
    /// Error message, if different from the event message
    pub message: Option<String>,
    /// Full stack trace; only the first line participates in fingerprints
    pub stack: Option<String>,
    /// Machine-readable error code
    pub code: Option<String>,
}

/// A raw, unredacted log event.
///
/// Built with the `with_*` methods:
///
/// ```
/// use donation_guard::domain::event::LogEvent;
///
/// let event = LogEvent::error("Failed to save donor profile")
///     .with_route("/api/donors/profile")
///     .with_method("post")
///     .with_code("permission-denied")
///     .with_metadata("attempt", 2_u64);
/// assert_eq!(event.code(), Some("permission-denied"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct LogEvent {
    pub level: Level,
    pub message: String,
    pub error: Option<ErrorDetails>,
    pub route: Option<String>,
    pub method: Option<String>,
    /// Explicit scope; inferred from the route when absent
    pub scope: Option<Scope>,
    pub actor_id: Option<String>,
    pub actor_role: Option<String>,
    pub metadata: BTreeMap<String, PayloadValue>,
}

impl LogEvent {
    /// Create an event at the given level.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            ..Self::default()
        }
    }

    /// Create an error-level event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Level::Error, message)
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_actor(mut self, id: impl Into<String>, role: impl Into<String>) -> Self {
        self.actor_id = Some(id.into());
        self.actor_role = Some(role.into());
        self
    }

    pub fn with_error(mut self, error: ErrorDetails) -> Self {
        self.error = Some(error);
        self
    }

    /// Set the error code, creating error details if needed.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.error.get_or_insert_with(ErrorDetails::default).code = Some(code.into());
        self
    }

    /// Set the stack trace, creating error details if needed.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.error.get_or_insert_with(ErrorDetails::default).stack = Some(stack.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The event message, falling back to the error message when blank.
    pub fn effective_message(&self) -> &str {
        if !self.message.trim().is_empty() {
            return &self.message;
        }
        self.error
            .as_ref()
            .and_then(|e| e.message.as_deref())
            .unwrap_or_default()
    }

    pub fn code(&self) -> Option<&str> {
        self.error.as_ref().and_then(|e| e.code.as_deref())
    }

    pub fn stack(&self) -> Option<&str> {
        self.error.as_ref().and_then(|e| e.stack.as_deref())
    }

    /// The error's own message, independent of the event message.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().and_then(|e| e.message.as_deref())
    }

    pub fn error_name(&self) -> Option<&str> {
        self.error.as_ref().and_then(|e| e.name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_inference_by_segment() {
        assert_eq!(Scope::infer(Some("/api/donors/123")), Scope::Donor);
        assert_eq!(Scope::infer(Some("/api/ngos")), Scope::Ngo);
        assert_eq!(Scope::infer(Some("/Bloodbanks/inventory")), Scope::Bloodbank);
        assert_eq!(Scope::infer(Some("/api/admin/impersonate")), Scope::Admin);
        assert_eq!(Scope::infer(Some("/signup")), Scope::Auth);
        assert_eq!(Scope::infer(Some("/api/campaigns/7")), Scope::Campaign);
        assert_eq!(Scope::infer(Some("/api/appointments")), Scope::Request);
    }

    #[test]
    fn test_scope_first_matching_segment_wins() {
        assert_eq!(Scope::infer(Some("/api/admin/donors")), Scope::Admin);
        assert_eq!(Scope::infer(Some("/api/donors/admin")), Scope::Donor);
    }

    #[test]
    fn test_scope_ignores_query_and_unknown_routes() {
        assert_eq!(Scope::infer(Some("/health?donors=1")), Scope::General);
        assert_eq!(Scope::infer(Some("")), Scope::General);
        assert_eq!(Scope::infer(Some("/")), Scope::General);
        assert_eq!(Scope::infer(None), Scope::General);
    }

    #[test]
    fn test_effective_message_falls_back_to_error_message() {
        let event = LogEvent::error("  ").with_error(ErrorDetails {
            message: Some("quota exceeded".to_string()),
            ..ErrorDetails::default()
        });
        assert_eq!(event.effective_message(), "quota exceeded");

        let event = LogEvent::error("primary");
        assert_eq!(event.effective_message(), "primary");
    }

    #[test]
    fn test_builder_helpers_share_error_details() {
        let event = LogEvent::error("boom")
            .with_code("E42")
            .with_stack("Error: boom\n    at handler (index.js:1:1)");
        assert_eq!(event.code(), Some("E42"));
        assert!(event.stack().unwrap().starts_with("Error: boom"));
        assert_eq!(event.error_name(), None);
    }

    #[test]
    fn test_level_and_source_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&Level::Warn).unwrap(), "\"warn\"");
        assert_eq!(serde_json::to_string(&Source::Server).unwrap(), "\"server\"");
        assert_eq!(serde_json::to_string(&Scope::Bloodbank).unwrap(), "\"bloodbank\"");
    }
}

//! Field visitor turning tracing events into [`LogEvent`]s.
//!
//! Well-known field names map onto event attributes; everything else lands
//! in the event's metadata with its native type preserved where tracing
//! reports one.
//!
//! | Field | Event attribute |
//! |---|---|
//! | `message` | message |
//! | `route`, `path` | route |
//! | `method` | method |
//! | `code`, `error_code` | error code |
//! | `error` | error message |
//! | `error_name` | error name |
//! | `stack` | stack trace |
//! | `actor_id`, `actor_role` | actor |

use crate::domain::event::{ErrorDetails, Level, LogEvent};
use crate::domain::redaction::PayloadValue;
use std::fmt;
use tracing::field::{Field, Visit};

/// A visitor that collects event fields into a [`LogEvent`].
#[derive(Debug)]
pub(crate) struct EventFieldVisitor {
    event: LogEvent,
}

impl EventFieldVisitor {
    pub fn new(level: Level) -> Self {
        Self {
            event: LogEvent::new(level, String::new()),
        }
    }

    /// Consume the visitor and return the collected event.
    pub fn into_event(self) -> LogEvent {
        self.event
    }

    fn error_details(&mut self) -> &mut ErrorDetails {
        self.event.error.get_or_insert_with(ErrorDetails::default)
    }

    fn record_text(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.event.message = value,
            "route" | "path" => self.event.route = Some(value),
            "method" => self.event.method = Some(value),
            "code" | "error_code" => self.error_details().code = Some(value),
            "error" => self.error_details().message = Some(value),
            "error_name" => self.error_details().name = Some(value),
            "stack" => self.error_details().stack = Some(value),
            "actor_id" => self.event.actor_id = Some(value),
            "actor_role" => self.event.actor_role = Some(value),
            name => {
                self.event
                    .metadata
                    .insert(name.to_string(), PayloadValue::String(value));
            }
        }
    }

    fn record_value(&mut self, field: &Field, value: PayloadValue) {
        self.event.metadata.insert(field.name().to_string(), value);
    }
}

impl Visit for EventFieldVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field, value.into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, value.into());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_text(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.record_text(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_text(field, format!("{:?}", value));
    }
}

/// Map a tracing level onto the event level.
pub(crate) fn event_level(level: &tracing::Level) -> Level {
    match *level {
        tracing::Level::ERROR => Level::Error,
        tracing::Level::WARN => Level::Warn,
        tracing::Level::INFO => Level::Info,
        _ => Level::Debug,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<LogEvent>>>);

    impl<S: tracing::Subscriber> Layer<S> for Collect {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = EventFieldVisitor::new(event_level(event.metadata().level()));
            event.record(&mut visitor);
            self.0.lock().unwrap().push(visitor.into_event());
        }
    }

    #[test]
    fn test_well_known_fields_map_onto_event() {
        let collect = Collect::default();
        let subscriber = tracing_subscriber::registry().with(collect.clone());

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(
                route = "/api/donors",
                method = "POST",
                code = "permission-denied",
                error = %"missing claim",
                actor_id = "uid-7",
                attempt = 3_u64,
                retried = true,
                "save failed"
            );
        });

        let events = collect.0.lock().unwrap();
        let event = &events[0];
        assert_eq!(event.level, Level::Error);
        assert_eq!(event.message, "save failed");
        assert_eq!(event.route.as_deref(), Some("/api/donors"));
        assert_eq!(event.method.as_deref(), Some("POST"));
        assert_eq!(event.code(), Some("permission-denied"));
        assert_eq!(
            event.error.as_ref().and_then(|e| e.message.as_deref()),
            Some("missing claim")
        );
        assert_eq!(event.actor_id.as_deref(), Some("uid-7"));
        assert!(matches!(event.metadata.get("attempt"), Some(PayloadValue::Number(_))));
        assert!(matches!(event.metadata.get("retried"), Some(PayloadValue::Bool(true))));
    }

    #[test]
    fn test_event_level_mapping() {
        assert_eq!(event_level(&tracing::Level::ERROR), Level::Error);
        assert_eq!(event_level(&tracing::Level::TRACE), Level::Debug);
    }
}

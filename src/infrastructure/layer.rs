//! Tracing integration layer.
//!
//! Provides a `tracing::Layer` that forwards error events emitted by request
//! handlers to a [`Guard`]'s server-side telemetry pipeline, so existing
//! `tracing::error!` call sites feed the same redacted, deduplicated error
//! log as client reports.

use crate::application::ports::DocumentStore;
use crate::domain::redaction::PayloadValue;
use crate::infrastructure::guard::Guard;
use crate::infrastructure::visitor::{event_level, EventFieldVisitor};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Target prefix of this crate's own diagnostics, never captured.
const OWN_TARGET: &str = "donation_guard";

/// Request attributes recorded on a span and inherited by events inside it.
#[derive(Debug, Clone, Default)]
struct RequestContext {
    route: Option<String>,
    method: Option<String>,
    actor_id: Option<String>,
    actor_role: Option<String>,
}

impl Visit for RequestContext {
    fn record_str(&mut self, field: &Field, value: &str) {
        let slot = match field.name() {
            "route" | "path" => &mut self.route,
            "method" => &mut self.method,
            "actor_id" => &mut self.actor_id,
            "actor_role" => &mut self.actor_role,
            _ => return,
        };
        *slot = Some(value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_str(field, &format!("{:?}", value));
    }
}

/// Forwards error events to a [`Guard`].
///
/// Events are handed to the guard on a spawned tokio task; outside a tokio
/// runtime they are dropped and counted as internal failures. Events from
/// this crate's own target are ignored so a failing store cannot feed back
/// into itself.
///
/// ```no_run
/// use donation_guard::{ErrorCaptureLayer, Guard, InMemoryDocumentStore};
/// use std::sync::Arc;
/// use tracing_subscriber::layer::SubscriberExt;
///
/// let guard = Guard::builder(Arc::new(InMemoryDocumentStore::new()))
///     .build()
///     .unwrap();
/// let subscriber = tracing_subscriber::registry().with(ErrorCaptureLayer::new(guard));
/// tracing::subscriber::set_global_default(subscriber).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ErrorCaptureLayer<D: DocumentStore + Clone> {
    guard: Guard<D>,
    max_level: Level,
    exempt_targets: Arc<Vec<String>>,
}

impl<D: DocumentStore + Clone> ErrorCaptureLayer<D> {
    /// Capture `ERROR` events into `guard`.
    pub fn new(guard: Guard<D>) -> Self {
        Self {
            guard,
            max_level: Level::ERROR,
            exempt_targets: Arc::new(vec![OWN_TARGET.to_string()]),
        }
    }

    /// Also capture events up to this verbosity, e.g. `Level::WARN`.
    pub fn with_max_level(mut self, level: Level) -> Self {
        self.max_level = level;
        self
    }

    /// Ignore events whose target starts with `prefix`.
    pub fn with_exempt_target(mut self, prefix: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.exempt_targets).push(prefix.into());
        self
    }

    pub fn guard(&self) -> &Guard<D> {
        &self.guard
    }

    fn captures(&self, level: &Level, target: &str) -> bool {
        *level <= self.max_level
            && !self
                .exempt_targets
                .iter()
                .any(|prefix| target.starts_with(prefix.as_str()))
    }
}

impl<D, Sub> Layer<Sub> for ErrorCaptureLayer<D>
where
    D: DocumentStore + Clone + 'static,
    Sub: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: Context<'_, Sub>,
    ) {
        let mut request = RequestContext::default();
        attrs.record(&mut request);
        if request.route.is_none() && request.method.is_none() && request.actor_id.is_none() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(request);
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, Sub>) {
        let meta = event.metadata();
        if !self.captures(meta.level(), meta.target()) {
            return;
        }

        let mut visitor = EventFieldVisitor::new(event_level(meta.level()));
        event.record(&mut visitor);
        let mut log_event = visitor.into_event();
        log_event
            .metadata
            .insert("target".to_string(), PayloadValue::from(meta.target()));

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                let extensions = span.extensions();
                let Some(request) = extensions.get::<RequestContext>() else {
                    continue;
                };
                fill(&mut log_event.route, &request.route);
                fill(&mut log_event.method, &request.method);
                fill(&mut log_event.actor_id, &request.actor_id);
                fill(&mut log_event.actor_role, &request.actor_role);
            }
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let guard = self.guard.clone();
                handle.spawn(async move { guard.log_server_error(log_event).await });
            }
            Err(_) => self.guard.metrics().record_internal_failure(),
        }
    }
}

fn fill(slot: &mut Option<String>, from: &Option<String>) {
    if slot.is_none() {
        slot.clone_from(from);
    }
}

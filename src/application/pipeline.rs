//! The error telemetry pipeline.
//!
//! Every call runs redaction, fingerprinting, both dedupe tiers and at most
//! one store append. Client-reported errors and the backend's own request
//! errors share this pipeline; a [`TelemetryProfile`] picks the source name
//! and redaction thresholds for each.
//!
//! The pipeline is fail-open: nothing it does can surface an error or a
//! panic to the caller.

use crate::application::dedup_cache::DedupKey;
use crate::application::deduplicator::Deduplicator;
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, DocumentStore, Storage};
use crate::application::telemetry::TelemetryWriter;
use crate::domain::event::{LogEvent, Source};
use crate::domain::fingerprint::Fingerprint;
use crate::domain::record::RedactedPayload;
use crate::domain::redaction::{RedactionLimits, Redactor};
use crate::domain::throttle::{DedupDecision, DedupEntry, SuppressReason};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Per-call-site settings of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryProfile {
    pub source: Source,
    pub limits: RedactionLimits,
}

impl TelemetryProfile {
    /// Errors reported by browsers and mobile clients.
    pub fn client_errors() -> Self {
        Self {
            source: Source::Client,
            limits: RedactionLimits {
                max_depth: 6,
                max_string_len: 2_000,
                max_keys: 50,
                max_items: 50,
            },
        }
    }

    /// Errors raised while serving requests.
    ///
    /// Server payloads carry request contexts, so they are kept smaller.
    pub fn server_requests() -> Self {
        Self {
            source: Source::Server,
            limits: RedactionLimits {
                max_depth: 5,
                max_string_len: 1_200,
                max_keys: 40,
                max_items: 40,
            },
        }
    }
}

/// What happened to one submitted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    /// A record was written
    Persisted(Fingerprint),
    /// The event was a duplicate or over its throttle limit
    Suppressed(SuppressReason),
    /// The event was admitted but the write failed
    PersistFailed,
    /// Redaction, fingerprinting or a store adapter panicked
    InternalFailure,
}

impl LogOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, LogOutcome::Persisted(_))
    }
}

/// Redact, fingerprint, dedupe and persist.
#[derive(Debug, Clone)]
pub struct TelemetryPipeline<S, D>
where
    S: Storage<DedupKey, DedupEntry> + Clone,
    D: DocumentStore,
{
    profile: TelemetryProfile,
    redactor: Redactor,
    dedup: Deduplicator<S, D>,
    writer: TelemetryWriter<D>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl<S, D> TelemetryPipeline<S, D>
where
    S: Storage<DedupKey, DedupEntry> + Clone,
    D: DocumentStore,
{
    pub fn new(
        profile: TelemetryProfile,
        dedup: Deduplicator<S, D>,
        writer: TelemetryWriter<D>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            profile,
            redactor: Redactor::new(profile.limits),
            dedup,
            writer,
            clock,
            metrics,
        }
    }

    /// Replace the redactor, e.g. to add detectors or change the key policy.
    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    /// Run one event through the pipeline.
    pub async fn submit(&self, event: LogEvent) -> LogOutcome {
        match CatchUnwind::new(self.process(event)).await {
            Ok(outcome) => outcome,
            Err(()) => {
                self.metrics.record_internal_failure();
                tracing::warn!(source = %self.profile.source, "telemetry pipeline panicked, event dropped");
                LogOutcome::InternalFailure
            }
        }
    }

    async fn process(&self, event: LogEvent) -> LogOutcome {
        let now = self.clock.now_millis();

        let prepared = panic::catch_unwind(AssertUnwindSafe(|| {
            let payload = RedactedPayload::from_event(&event, &self.redactor);
            let fingerprint = payload.fingerprint();
            (fingerprint, payload)
        }));
        let (fingerprint, payload) = match prepared {
            Ok(prepared) => prepared,
            Err(_) => {
                self.metrics.record_internal_failure();
                tracing::warn!(source = %self.profile.source, "failed to prepare error event, event dropped");
                return LogOutcome::InternalFailure;
            }
        };

        if let DedupDecision::Suppress(reason) =
            self.dedup.check(payload.route.as_deref(), &fingerprint, now).await
        {
            return LogOutcome::Suppressed(reason);
        }

        let persisted = self
            .writer
            .persist(payload, fingerprint.clone(), event.scope, self.profile.source, now)
            .await;
        if persisted {
            LogOutcome::Persisted(fingerprint)
        } else {
            LogOutcome::PersistFailed
        }
    }

    pub fn profile(&self) -> &TelemetryProfile {
        &self.profile
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    pub fn deduplicator(&self) -> &Deduplicator<S, D> {
        &self.dedup
    }

    pub fn writer(&self) -> &TelemetryWriter<D> {
        &self.writer
    }
}

/// Resolves to `Err(())` if polling the inner future panics.
struct CatchUnwind<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> CatchUnwind<F> {
    fn new(inner: F) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl<F: Future> Future for CatchUnwind<F> {
    type Output = Result<F::Output, ()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.inner.as_mut();
        match panic::catch_unwind(AssertUnwindSafe(|| inner.poll(cx))) {
            Ok(Poll::Ready(output)) => Poll::Ready(Ok(output)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(_) => Poll::Ready(Err(())),
        }
    }
}

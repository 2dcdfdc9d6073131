//! Persistence of admitted error records.

use crate::application::metrics::Metrics;
use crate::application::ports::{with_timeout, DocumentStore};
use crate::domain::event::{Scope, Source};
use crate::domain::fingerprint::Fingerprint;
use crate::domain::record::{PersistedLogRecord, RedactedPayload};
use std::time::Duration;

/// Collection holding persisted error records.
pub const ERROR_LOGS_COLLECTION: &str = "error_logs";

/// Writes one record per admitted event. Failures are logged and swallowed.
#[derive(Debug, Clone)]
pub struct TelemetryWriter<D: DocumentStore> {
    store: D,
    collection: String,
    store_timeout: Duration,
    metrics: Metrics,
}

impl<D: DocumentStore> TelemetryWriter<D> {
    pub fn new(store: D, store_timeout: Duration, metrics: Metrics) -> Self {
        Self {
            store,
            collection: ERROR_LOGS_COLLECTION.to_string(),
            store_timeout,
            metrics,
        }
    }

    /// Write to a different collection.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Persist one redacted payload.
    ///
    /// When `scope` is `None` it is inferred from the payload's route.
    /// Returns whether the record was written; never returns an error.
    pub async fn persist(
        &self,
        payload: RedactedPayload,
        fingerprint: Fingerprint,
        scope: Option<Scope>,
        source: Source,
        created_at: u64,
    ) -> bool {
        let scope = scope.unwrap_or_else(|| Scope::infer(payload.route.as_deref()));
        let record = PersistedLogRecord::new(payload, fingerprint, scope, source, created_at);

        let document = match record.to_document() {
            Ok(document) => document,
            Err(e) => {
                self.metrics.record_persist_failure();
                tracing::warn!(fingerprint = %record.fingerprint, error = %e, "failed to encode error record");
                return false;
            }
        };

        match with_timeout(self.store_timeout, self.store.append(&self.collection, document)).await {
            Ok(id) => {
                self.metrics.record_persisted();
                tracing::debug!(fingerprint = %record.fingerprint, id = %id, scope = %scope, "error record persisted");
                true
            }
            Err(e) => {
                self.metrics.record_persist_failure();
                tracing::warn!(
                    fingerprint = %record.fingerprint,
                    source = %source,
                    error = %e,
                    "failed to persist error record"
                );
                false
            }
        }
    }
}

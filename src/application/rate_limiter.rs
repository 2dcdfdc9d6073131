//! Atomic, time-bucketed rate limiting over the shared store.
//!
//! Correctness across instances relies solely on the store's transaction
//! serialization: the read, the capacity check and the increment happen in
//! one transaction, so concurrent callers never both consume the last unit.

use crate::application::error::StoreError;
use crate::application::metrics::Metrics;
use crate::application::ports::{with_timeout, Clock, Document, DocumentStore, TxOutcome};
use crate::domain::rate_limit::{
    counter_id, identity_hash, RateLimitCounter, RateLimitDecision, RateLimitQuota,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Collection holding rate limit counters.
pub const RATE_LIMITS_COLLECTION: &str = "rate_limits";

/// Per-key quota enforcement.
#[derive(Debug, Clone)]
pub struct RateLimiter<D: DocumentStore> {
    store: D,
    clock: Arc<dyn Clock>,
    collection: String,
    store_timeout: Duration,
    metrics: Metrics,
}

impl<D: DocumentStore> RateLimiter<D> {
    pub fn new(store: D, clock: Arc<dyn Clock>, store_timeout: Duration, metrics: Metrics) -> Self {
        Self {
            store,
            clock,
            collection: RATE_LIMITS_COLLECTION.to_string(),
            store_timeout,
            metrics,
        }
    }

    /// Keep counters in a different collection.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Check one request against `quota` and consume a unit if it fits.
    ///
    /// A denied request writes nothing. Store failures, including an
    /// unreadable counter, are returned as [`StoreError`] for the caller to
    /// resolve.
    pub async fn check_and_consume(
        &self,
        key: &str,
        quota: &RateLimitQuota,
    ) -> Result<RateLimitDecision, StoreError> {
        let now = self.clock.now_millis();
        let id = counter_id(&identity_hash(key), quota.bucket(now));
        let quota = *quota;

        let tx = self.store.transact(&self.collection, &id, move |current| {
            let existing = match current.map(decode_counter).transpose() {
                Ok(existing) => existing,
                Err(e) => return TxOutcome::Abort(Err(e)),
            };
            match RateLimitCounter::consume(existing, &quota, now) {
                (Some(counter), decision) => TxOutcome::Commit(encode_counter(&counter), Ok(decision)),
                (None, decision) => TxOutcome::Abort(Ok(decision)),
            }
        });

        let result = with_timeout(self.store_timeout, tx).await.and_then(|inner| inner);

        match &result {
            Ok(RateLimitDecision::Allowed(allowed)) => {
                self.metrics.record_rate_limit_allowed();
                tracing::trace!(counter = %id, count = allowed.count, "rate limit unit consumed");
            }
            Ok(RateLimitDecision::Denied(denied)) => {
                self.metrics.record_rate_limit_denied();
                tracing::debug!(
                    counter = %id,
                    capacity = denied.capacity,
                    retry_after_ms = denied.retry_after.as_millis() as u64,
                    "rate limit exceeded"
                );
            }
            Err(e) => {
                self.metrics.record_rate_limit_storage_error();
                tracing::warn!(counter = %id, error = %e, "rate limit transaction failed");
            }
        }
        result
    }
}

fn decode_counter(document: &Document) -> Result<RateLimitCounter, StoreError> {
    RateLimitCounter::deserialize(document).map_err(StoreError::from)
}

fn encode_counter(counter: &RateLimitCounter) -> Document {
    json!({
        "count": counter.count,
        "timeBucket": counter.time_bucket,
        "updatedAt": counter.updated_at,
        "expiresAt": counter.expires_at,
    })
}

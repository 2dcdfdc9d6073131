//! Two-tier deduplication.
//!
//! Tier one is the in-process [`DedupCache`]. When it admits an event, tier
//! two asks the shared store whether any instance persisted the same
//! fingerprint from the same source inside the dedupe window. The backstop
//! may under-suppress (two instances racing past it) but never suppresses an
//! event nobody recorded.

use crate::application::dedup_cache::{DedupCache, DedupKey};
use crate::application::error::StoreError;
use crate::application::metrics::Metrics;
use crate::application::ports::{with_timeout, DocumentStore, Query, Storage};
use crate::domain::event::Source;
use crate::domain::fingerprint::Fingerprint;
use crate::domain::record::{created_at, is_from, CREATED_AT_FIELD, FINGERPRINT_FIELD};
use crate::domain::throttle::{DedupDecision, DedupEntry, SuppressReason};
use std::time::Duration;

/// Rows fetched by the ordered backstop query.
pub const ORDERED_BACKSTOP_LIMIT: usize = 5;
/// Rows fetched by the unordered fallback query.
pub const FALLBACK_BACKSTOP_LIMIT: usize = 25;

/// Combines the local cache with the store backstop.
#[derive(Debug, Clone)]
pub struct Deduplicator<S, D>
where
    S: Storage<DedupKey, DedupEntry> + Clone,
    D: DocumentStore,
{
    cache: DedupCache<S>,
    store: D,
    source: Source,
    collection: String,
    store_timeout: Duration,
    metrics: Metrics,
}

impl<S, D> Deduplicator<S, D>
where
    S: Storage<DedupKey, DedupEntry> + Clone,
    D: DocumentStore,
{
    pub fn new(
        cache: DedupCache<S>,
        store: D,
        source: Source,
        collection: impl Into<String>,
        store_timeout: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            cache,
            store,
            source,
            collection: collection.into(),
            store_timeout,
            metrics,
        }
    }

    /// Decide whether an event with this route and fingerprint should be persisted.
    pub async fn check(&self, route: Option<&str>, fingerprint: &Fingerprint, now: u64) -> DedupDecision {
        let key = DedupKey::new(route, fingerprint.clone());
        let local = self.cache.observe(key, now);
        if local.is_suppress() {
            self.metrics.record_suppressed_locally();
            tracing::debug!(fingerprint = %fingerprint, decision = ?local, "suppressed by local cache");
            return local;
        }

        match self.seen_recently(fingerprint, now).await {
            Ok(true) => {
                self.metrics.record_suppressed_by_backstop();
                tracing::debug!(fingerprint = %fingerprint, "suppressed by store backstop");
                DedupDecision::Suppress(SuppressReason::SeenByPeer)
            }
            Ok(false) => {
                self.metrics.record_admitted();
                DedupDecision::Admit
            }
            Err(e) => {
                self.metrics.record_backstop_failure();
                self.metrics.record_admitted();
                tracing::warn!(
                    fingerprint = %fingerprint,
                    error = %e,
                    "dedupe backstop unavailable, admitting event"
                );
                DedupDecision::Admit
            }
        }
    }

    /// Whether a record with this fingerprint and source was persisted inside
    /// the dedupe window.
    ///
    /// Records from the other source never count, so client and server
    /// reports of the same failure do not suppress each other.
    ///
    /// Tries the ordered query first. If that fails (typically a missing
    /// index) it falls back to a wider unordered query; only when both fail
    /// is the error returned.
    pub async fn seen_recently(&self, fingerprint: &Fingerprint, now: u64) -> Result<bool, StoreError> {
        let ordered = Query::eq(FINGERPRINT_FIELD, fingerprint.as_str())
            .order_by_desc(CREATED_AT_FIELD)
            .limit(ORDERED_BACKSTOP_LIMIT);

        let rows = match self.run(&ordered).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    error = %e,
                    "ordered dedupe query failed, retrying unordered"
                );
                let fallback =
                    Query::eq(FINGERPRINT_FIELD, fingerprint.as_str()).limit(FALLBACK_BACKSTOP_LIMIT);
                self.run(&fallback).await?
            }
        };

        let window = self.cache.windows().dedupe_window_ms;
        Ok(rows
            .iter()
            .filter(|row| is_from(row, self.source))
            .filter_map(created_at)
            .any(|at| now.saturating_sub(at) < window))
    }

    async fn run(&self, query: &Query) -> Result<Vec<serde_json::Value>, StoreError> {
        with_timeout(self.store_timeout, self.store.query(&self.collection, query)).await
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn cache(&self) -> &DedupCache<S> {
        &self.cache
    }
}

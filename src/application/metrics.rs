//! Observability metrics for telemetry and rate limiting.
//!
//! Provides counters about pipeline and limiter behavior for monitoring and
//! debugging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking guard statistics.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    events_admitted: AtomicU64,
    suppressed_locally: AtomicU64,
    suppressed_by_backstop: AtomicU64,
    backstop_failures: AtomicU64,
    records_persisted: AtomicU64,
    persist_failures: AtomicU64,
    internal_failures: AtomicU64,
    cache_evictions: AtomicU64,
    rate_limit_allowed: AtomicU64,
    rate_limit_denied: AtomicU64,
    rate_limit_storage_errors: AtomicU64,
}

macro_rules! counter {
    ($record:ident, $read:ident) => {
        pub(crate) fn $record(&self) {
            self.inner.$read.fetch_add(1, Ordering::Relaxed);
        }

        pub fn $read(&self) -> u64 {
            self.inner.$read.load(Ordering::Relaxed)
        }
    };
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_admitted, events_admitted);
    counter!(record_suppressed_locally, suppressed_locally);
    counter!(record_suppressed_by_backstop, suppressed_by_backstop);
    counter!(record_backstop_failure, backstop_failures);
    counter!(record_persisted, records_persisted);
    counter!(record_persist_failure, persist_failures);
    counter!(record_internal_failure, internal_failures);
    counter!(record_rate_limit_allowed, rate_limit_allowed);
    counter!(record_rate_limit_denied, rate_limit_denied);
    counter!(record_rate_limit_storage_error, rate_limit_storage_errors);

    /// Record `n` cache evictions.
    pub(crate) fn record_evictions(&self, n: u64) {
        self.inner.cache_evictions.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the total number of cache entries evicted.
    pub fn cache_evictions(&self) -> u64 {
        self.inner.cache_evictions.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_admitted: self.events_admitted(),
            suppressed_locally: self.suppressed_locally(),
            suppressed_by_backstop: self.suppressed_by_backstop(),
            backstop_failures: self.backstop_failures(),
            records_persisted: self.records_persisted(),
            persist_failures: self.persist_failures(),
            internal_failures: self.internal_failures(),
            cache_evictions: self.cache_evictions(),
            rate_limit_allowed: self.rate_limit_allowed(),
            rate_limit_denied: self.rate_limit_denied(),
            rate_limit_storage_errors: self.rate_limit_storage_errors(),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Events that passed both dedupe tiers
    pub events_admitted: u64,
    /// Events suppressed by the in-process cache
    pub suppressed_locally: u64,
    /// Events suppressed because a peer persisted the same fingerprint
    pub suppressed_by_backstop: u64,
    /// Backstop lookups where both queries failed
    pub backstop_failures: u64,
    pub records_persisted: u64,
    pub persist_failures: u64,
    /// Panics or errors caught before the event reached the store
    pub internal_failures: u64,
    pub cache_evictions: u64,
    pub rate_limit_allowed: u64,
    pub rate_limit_denied: u64,
    pub rate_limit_storage_errors: u64,
}

impl MetricsSnapshot {
    /// Calculate the suppression rate (0.0 to 1.0).
    ///
    /// Returns 0.0 if no events have been processed.
    pub fn suppression_rate(&self) -> f64 {
        let total = self.total_events();
        if total == 0 {
            0.0
        } else {
            self.total_suppressed() as f64 / total as f64
        }
    }

    pub fn total_suppressed(&self) -> u64 {
        self.suppressed_locally
            .saturating_add(self.suppressed_by_backstop)
    }

    /// Get the total number of events that reached a dedupe decision.
    pub fn total_events(&self) -> u64 {
        self.events_admitted.saturating_add(self.total_suppressed())
    }
}

//! Bounded in-process dedupe cache.
//!
//! The cache is the first dedupe tier. It is local to one process instance,
//! so it is a best-effort optimization: peers are caught by the store
//! backstop instead.

use crate::application::metrics::Metrics;
use crate::application::ports::Storage;
use crate::domain::fingerprint::Fingerprint;
use crate::domain::throttle::{DedupDecision, DedupEntry, ThrottleWindows};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cache key: the same fingerprint on two routes is tracked separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub route: String,
    pub fingerprint: Fingerprint,
}

impl DedupKey {
    pub fn new(route: Option<&str>, fingerprint: Fingerprint) -> Self {
        Self {
            route: route.unwrap_or("unknown").to_string(),
            fingerprint,
        }
    }
}

/// Sliding-window dedupe cache bounded by `max_entries`.
///
/// Uses the Storage port for concurrent access. In production, use
/// `Arc<ShardedStorage>`.
#[derive(Debug, Clone)]
pub struct DedupCache<S>
where
    S: Storage<DedupKey, DedupEntry> + Clone,
{
    storage: S,
    windows: ThrottleWindows,
    max_entries: usize,
    next_seq: Arc<AtomicU64>,
    metrics: Metrics,
}

impl<S> DedupCache<S>
where
    S: Storage<DedupKey, DedupEntry> + Clone,
{
    pub fn new(storage: S, windows: ThrottleWindows, max_entries: usize, metrics: Metrics) -> Self {
        Self {
            storage,
            windows,
            max_entries: max_entries.max(1),
            next_seq: Arc::new(AtomicU64::new(0)),
            metrics,
        }
    }

    /// Observe one event at `now` (epoch ms) and decide.
    ///
    /// Runs cleanup before returning whenever the cache grew past its bound.
    pub fn observe(&self, key: DedupKey, now: u64) -> DedupDecision {
        let windows = self.windows;
        let next_seq = &self.next_seq;
        let decision = self.storage.with_entry_mut(
            key,
            || DedupEntry::vacant(next_seq.fetch_add(1, Ordering::Relaxed)),
            |entry| entry.observe(now, &windows),
        );

        if self.storage.len() > self.max_entries {
            self.cleanup(now);
        }
        decision
    }

    /// Drop stale entries, then the oldest-inserted until within bound.
    pub fn cleanup(&self, now: u64) {
        let windows = self.windows;
        let before = self.storage.len();
        self.storage.retain(|_, entry| !entry.is_stale(now, &windows));

        while self.storage.len() > self.max_entries {
            let excess = self.storage.len() - self.max_entries;
            let mut by_age: Vec<(u64, DedupKey)> = Vec::with_capacity(self.storage.len());
            self.storage
                .for_each(|key, entry| by_age.push((entry.inserted_seq, key.clone())));
            by_age.sort_unstable_by_key(|(seq, _)| *seq);

            for (_, key) in by_age.into_iter().take(excess) {
                self.storage.remove(&key);
            }
        }

        let evicted = before.saturating_sub(self.storage.len());
        if evicted > 0 {
            self.metrics.record_evictions(evicted as u64);
            tracing::debug!(evicted, remaining = self.storage.len(), "dedupe cache cleanup");
        }
    }

    pub fn windows(&self) -> &ThrottleWindows {
        &self.windows
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Snapshot of the state tracked for `key`, if any.
    pub fn entry(&self, key: &DedupKey) -> Option<DedupEntry> {
        let mut found = None;
        self.storage.for_each(|k, entry| {
            if k == key {
                found = Some(*entry);
            }
        });
        found
    }

    /// Get the number of tracked keys.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Clear all tracked state.
    pub fn clear(&self) {
        self.storage.clear();
    }
}

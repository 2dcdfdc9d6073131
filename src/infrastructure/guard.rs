//! The guard facade and its builder.
//!
//! [`Guard`] is what outer handlers hold. It wires the telemetry pipelines
//! and the rate limiter to one shared [`DocumentStore`] and exposes the two
//! narrow entry points: "log this error" and "consume one unit of quota".

use crate::application::config::{ConfigError, GuardConfig, StorageFailurePolicy};
use crate::application::dedup_cache::{DedupCache, DedupKey};
use crate::application::deduplicator::Deduplicator;
use crate::application::error::RateLimitError;
use crate::application::metrics::Metrics;
use crate::application::pipeline::{LogOutcome, TelemetryPipeline, TelemetryProfile};
use crate::application::ports::{Clock, DocumentStore};
use crate::application::rate_limiter::{RateLimiter, RATE_LIMITS_COLLECTION};
use crate::application::telemetry::{TelemetryWriter, ERROR_LOGS_COLLECTION};
use crate::domain::event::LogEvent;
use crate::domain::rate_limit::{Allowed, RateLimitDecision, RateLimitQuota};
use crate::domain::redaction::Redactor;
use crate::domain::throttle::DedupEntry;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::memory_store::InMemoryDocumentStore;
use crate::infrastructure::storage::ShardedStorage;
use std::sync::Arc;
use std::time::Duration;

/// Storage backing each pipeline's dedupe cache.
pub type CacheStorage = Arc<ShardedStorage<DedupKey, DedupEntry>>;

/// Builder for constructing a [`Guard`].
pub struct GuardBuilder<D: DocumentStore + Clone> {
    store: D,
    config: GuardConfig,
    clock: Option<Arc<dyn Clock>>,
    client_redactor: Option<Redactor>,
    server_redactor: Option<Redactor>,
    error_collection: String,
    rate_limit_collection: String,
}

impl<D: DocumentStore + Clone> GuardBuilder<D> {
    fn new(store: D) -> Self {
        Self {
            store,
            config: GuardConfig::default(),
            clock: None,
            client_redactor: None,
            server_redactor: None,
            error_collection: ERROR_LOGS_COLLECTION.to_string(),
            rate_limit_collection: RATE_LIMITS_COLLECTION.to_string(),
        }
    }

    /// Replace the whole configuration, e.g. with [`GuardConfig::from_env`].
    pub fn with_config(mut self, config: GuardConfig) -> Self {
        self.config = config;
        self
    }

    /// Repeats inside this window are suppressed. Default: 30s.
    pub fn with_dedupe_window(mut self, window: Duration) -> Self {
        self.config.dedupe_window = window;
        self
    }

    /// Length of the per-key throttle window. Default: 60s.
    pub fn with_throttle_window(mut self, window: Duration) -> Self {
        self.config.throttle_window = window;
        self
    }

    /// Maximum records per key and throttle window. Default: 15.
    pub fn with_throttle_limit(mut self, limit: u32) -> Self {
        self.config.throttle_limit_per_key = limit;
        self
    }

    /// Bound on each in-process dedupe cache. Default: 1200.
    pub fn with_max_cache_entries(mut self, max: usize) -> Self {
        self.config.max_cache_entries = max;
        self
    }

    /// Quota applied by [`Guard::rate_limit`]. Default: 5 per 60s.
    pub fn with_rate_limit(mut self, capacity: u32, window: Duration) -> Self {
        self.config.rate_limit_capacity_per_window = capacity;
        self.config.rate_limit_window = window;
        self
    }

    /// Upper bound on every store call. Default: 5s.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout = timeout;
        self
    }

    /// Policy used by [`Guard::rate_limit_or_policy`]. Default: fail closed.
    pub fn with_storage_failure_policy(mut self, policy: StorageFailurePolicy) -> Self {
        self.config.rate_limit_storage_policy = policy;
        self
    }

    /// Set a custom clock (mainly for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the redactor used for client-reported errors.
    pub fn with_client_redactor(mut self, redactor: Redactor) -> Self {
        self.client_redactor = Some(redactor);
        self
    }

    /// Replace the redactor used for server-side errors.
    pub fn with_server_redactor(mut self, redactor: Redactor) -> Self {
        self.server_redactor = Some(redactor);
        self
    }

    /// Write error records to a different collection.
    pub fn with_error_collection(mut self, collection: impl Into<String>) -> Self {
        self.error_collection = collection.into();
        self
    }

    /// Keep rate limit counters in a different collection.
    pub fn with_rate_limit_collection(mut self, collection: impl Into<String>) -> Self {
        self.rate_limit_collection = collection.into();
        self
    }

    /// Build the guard.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn build(self) -> Result<Guard<D>, ConfigError> {
        self.config.validate()?;
        let default_quota = self.config.default_quota()?;

        let clock = self
            .clock
            .clone()
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        let metrics = Metrics::new();

        let client = self.pipeline(
            TelemetryProfile::client_errors(),
            self.client_redactor.clone(),
            &clock,
            &metrics,
        );
        let server = self.pipeline(
            TelemetryProfile::server_requests(),
            self.server_redactor.clone(),
            &clock,
            &metrics,
        );
        let limiter = RateLimiter::new(
            self.store.clone(),
            Arc::clone(&clock),
            self.config.store_timeout,
            metrics.clone(),
        )
        .with_collection(self.rate_limit_collection);

        Ok(Guard {
            inner: Arc::new(GuardInner {
                config: self.config,
                default_quota,
                client,
                server,
                limiter,
                metrics,
            }),
        })
    }

    fn pipeline(
        &self,
        profile: TelemetryProfile,
        redactor: Option<Redactor>,
        clock: &Arc<dyn Clock>,
        metrics: &Metrics,
    ) -> TelemetryPipeline<CacheStorage, D> {
        let cache = DedupCache::new(
            Arc::new(ShardedStorage::with_capacity(self.config.max_cache_entries)),
            self.config.throttle_windows(),
            self.config.max_cache_entries,
            metrics.clone(),
        );
        let dedup = Deduplicator::new(
            cache,
            self.store.clone(),
            profile.source,
            self.error_collection.clone(),
            self.config.store_timeout,
            metrics.clone(),
        );
        let writer = TelemetryWriter::new(self.store.clone(), self.config.store_timeout, metrics.clone())
            .with_collection(self.error_collection.clone());

        let pipeline =
            TelemetryPipeline::new(profile, dedup, writer, Arc::clone(clock), metrics.clone());
        match redactor {
            Some(redactor) => pipeline.with_redactor(redactor),
            None => pipeline,
        }
    }
}

#[derive(Debug)]
struct GuardInner<D: DocumentStore + Clone> {
    config: GuardConfig,
    default_quota: RateLimitQuota,
    client: TelemetryPipeline<CacheStorage, D>,
    server: TelemetryPipeline<CacheStorage, D>,
    limiter: RateLimiter<D>,
    metrics: Metrics,
}

/// Abuse- and noise-control entry points for request handlers.
///
/// Cheap to clone; clones share caches, metrics and the store handle.
///
/// ```
/// use donation_guard::{Guard, InMemoryDocumentStore, LogEvent};
/// use std::sync::Arc;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let guard = Guard::builder(Arc::new(InMemoryDocumentStore::new()))
///     .with_rate_limit(2, std::time::Duration::from_secs(60))
///     .build()
///     .unwrap();
///
/// guard.log_error(LogEvent::error("upload failed").with_route("/api/donors/report")).await;
///
/// assert!(guard.rate_limit("203.0.113.7").await.is_ok());
/// assert!(guard.rate_limit("203.0.113.7").await.is_ok());
/// assert!(guard.rate_limit("203.0.113.7").await.is_err());
/// # });
/// ```
#[derive(Debug)]
pub struct Guard<D: DocumentStore + Clone = Arc<InMemoryDocumentStore>> {
    inner: Arc<GuardInner<D>>,
}

impl<D: DocumentStore + Clone> Clone for Guard<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: DocumentStore + Clone> Guard<D> {
    /// Create a builder around a store handle.
    pub fn builder(store: D) -> GuardBuilder<D> {
        GuardBuilder::new(store)
    }

    /// Log a client-reported error. Never fails and never panics.
    pub async fn log_error(&self, event: LogEvent) {
        let _ = self.inner.client.submit(event).await;
    }

    /// Log an error raised while serving a request. Never fails and never panics.
    pub async fn log_server_error(&self, event: LogEvent) {
        let _ = self.inner.server.submit(event).await;
    }

    /// Like [`log_error`](Self::log_error), reporting what happened.
    pub async fn submit_client_error(&self, event: LogEvent) -> LogOutcome {
        self.inner.client.submit(event).await
    }

    /// Like [`log_server_error`](Self::log_server_error), reporting what happened.
    pub async fn submit_server_error(&self, event: LogEvent) -> LogOutcome {
        self.inner.server.submit(event).await
    }

    /// Consume one unit of the default quota for `key`.
    pub async fn rate_limit(&self, key: &str) -> Result<Allowed, RateLimitError> {
        let quota = self.inner.default_quota;
        self.consume(key, &quota).await
    }

    /// Consume one unit of an explicit quota for `key`.
    ///
    /// # Errors
    /// `Validation` for a zero capacity or window, `Exceeded` when the bucket
    /// is full, `Storage` when the counter could not be updated.
    pub async fn rate_limit_with(
        &self,
        key: &str,
        capacity: u32,
        window: Duration,
    ) -> Result<Allowed, RateLimitError> {
        let quota = RateLimitQuota::new(capacity, window)?;
        self.consume(key, &quota).await
    }

    /// Consume one unit of the default quota, resolving storage failures by `policy`.
    ///
    /// Returns `Ok(None)` when the store failed and `policy` is
    /// [`StorageFailurePolicy::FailOpen`]: the request may proceed but was
    /// not counted. With [`StorageFailurePolicy::FailClosed`] the storage
    /// error is returned.
    pub async fn rate_limit_or(
        &self,
        key: &str,
        policy: StorageFailurePolicy,
    ) -> Result<Option<Allowed>, RateLimitError> {
        match self.rate_limit(key).await {
            Ok(allowed) => Ok(Some(allowed)),
            Err(RateLimitError::Storage(e)) if policy == StorageFailurePolicy::FailOpen => {
                tracing::warn!(error = %e, "rate limit storage failed, allowing request");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// [`rate_limit_or`](Self::rate_limit_or) with the configured policy.
    pub async fn rate_limit_or_policy(&self, key: &str) -> Result<Option<Allowed>, RateLimitError> {
        self.rate_limit_or(key, self.inner.config.rate_limit_storage_policy)
            .await
    }

    async fn consume(&self, key: &str, quota: &RateLimitQuota) -> Result<Allowed, RateLimitError> {
        match self.inner.limiter.check_and_consume(key, quota).await? {
            RateLimitDecision::Allowed(allowed) => Ok(allowed),
            RateLimitDecision::Denied(denied) => Err(RateLimitError::Exceeded(denied)),
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn client_pipeline(&self) -> &TelemetryPipeline<CacheStorage, D> {
        &self.inner.client
    }

    pub fn server_pipeline(&self) -> &TelemetryPipeline<CacheStorage, D> {
        &self.inner.server
    }

    pub fn rate_limiter(&self) -> &RateLimiter<D> {
        &self.inner.limiter
    }
}

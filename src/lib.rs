//! # donation-guard
//!
//! Abuse- and noise-control for the stateless request handlers of a blood
//! donation platform.
//!
//! Handlers hold a [`Guard`] and call two narrow entry points:
//!
//! - **"log this error"**: the event is redacted, fingerprinted, deduplicated
//!   in two tiers and, if admitted, appended to a shared error log. Logging
//!   never fails and never panics, whatever the store does.
//! - **"consume one unit of quota for key K"**: a per-key counter in a
//!   transactional document store is incremented inside a fixed time bucket,
//!   and the request is allowed or denied.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use donation_guard::{Guard, GuardConfig, InMemoryDocumentStore, LogEvent, RateLimitError};
//! use std::sync::Arc;
//!
//! # async fn handler() -> Result<(), Box<dyn std::error::Error>> {
//! let guard = Guard::builder(Arc::new(InMemoryDocumentStore::new()))
//!     .with_config(GuardConfig::from_env()?)
//!     .build()?;
//!
//! match guard.rate_limit("ip:203.0.113.7").await {
//!     Ok(allowed) => println!("{} requests left", allowed.remaining),
//!     Err(RateLimitError::Exceeded(denied)) => println!("retry in {:?}", denied.retry_after),
//!     Err(e) => return Err(e.into()),
//! }
//!
//! guard
//!     .log_error(
//!         LogEvent::error("Failed to save donor profile")
//!             .with_route("/api/donors/profile")
//!             .with_method("POST")
//!             .with_code("permission-denied")
//!             .with_metadata("email", "donor@example.org"),
//!     )
//!     .await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Telemetry
//!
//! Every submitted event runs through the same pipeline:
//!
//! 1. **Redaction.** Sensitive keys (`password`, `token`, `authorization`,
//!    ...) and sensitive value shapes (emails, bearer tokens, JWTs, phone
//!    numbers) become `[REDACTED]`. Payloads are bounded in depth, keys,
//!    items and string length, and cycles become `[Circular]`.
//! 2. **Fingerprinting.** Route, method, error code, a normalized message and
//!    the first stack line are hashed into a stable SHA-256 fingerprint.
//!    Volatile tokens (UUIDs, long hex strings, long numbers) are masked
//!    first, so "order 48213 failed" and "order 48214 failed" collide.
//! 3. **Deduplication.** An in-process cache suppresses repeats inside the
//!    dedupe window and throttles each key to a limit per throttle window.
//!    Admitted events are then checked against recent records in the store,
//!    which catches repeats seen by other instances.
//! 4. **Persistence.** One record is appended to the `error_logs`
//!    collection.
//!
//! Any failure along the way is swallowed, counted in [`Metrics`] and logged
//! at `WARN` under this crate's target.
//!
//! ## Rate Limiting
//!
//! Counters live at `rate_limits/{identity}:{bucket}` where the identity is a
//! truncated SHA-256 of the caller's key and the bucket is
//! `floor(now / window)`. Each call runs one read-modify-write transaction,
//! so concurrent callers across instances never over-admit. Denials carry
//! the time left until the bucket rolls over.
//!
//! Storage failures surface as [`RateLimitError::Storage`]; use
//! [`Guard::rate_limit_or`] to resolve them with a
//! [`StorageFailurePolicy`] instead.
//!
//! ## Capturing `tracing` Errors
//!
//! [`ErrorCaptureLayer`] forwards `ERROR` events from existing `tracing`
//! call sites into the server-side pipeline, picking up `route`, `method`
//! and actor fields from the enclosing spans:
//!
//! ```rust,no_run
//! use donation_guard::{ErrorCaptureLayer, Guard, InMemoryDocumentStore};
//! use std::sync::Arc;
//! use tracing_subscriber::layer::SubscriberExt;
//!
//! let guard = Guard::builder(Arc::new(InMemoryDocumentStore::new())).build().unwrap();
//! let subscriber = tracing_subscriber::registry().with(ErrorCaptureLayer::new(guard));
//! tracing::subscriber::set_global_default(subscriber).unwrap();
//! ```
//!
//! ## Storage Backends
//!
//! - [`InMemoryDocumentStore`]: single-process, for tests and local runs
//! - `RedisDocumentStore` (feature `redis-storage`): shared across instances
//!
//! Implement [`DocumentStore`] to plug in anything else with transactional
//! single-document updates and equality queries.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    event::{ErrorDetails, Level, LogEvent, Scope, Source},
    fingerprint::Fingerprint,
    rate_limit::{Allowed, Denied, InvalidQuota, RateLimitDecision, RateLimitQuota},
    record::{PersistedLogRecord, RedactedPayload},
    redaction::{KeyPolicy, PayloadValue, RedactionLimits, Redactor, SharedValue, ValueDetector},
    throttle::{DedupDecision, SuppressReason, ThrottleWindows},
};

pub use application::{
    config::{ConfigError, GuardConfig, StorageFailurePolicy},
    error::{RateLimitError, StoreError},
    metrics::{Metrics, MetricsSnapshot},
    pipeline::{LogOutcome, TelemetryPipeline, TelemetryProfile},
    ports::{Clock, Document, DocumentStore, Query, Storage, TxOutcome},
    rate_limiter::RateLimiter,
};

pub use infrastructure::{
    clock::SystemClock,
    guard::{Guard, GuardBuilder},
    layer::ErrorCaptureLayer,
    memory_store::InMemoryDocumentStore,
    storage::ShardedStorage,
};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_store::{RedisDocumentStore, RedisStoreConfig};

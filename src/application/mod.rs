//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages the runtime behavior:
//! - Dedupe cache (first, in-process dedupe tier)
//! - Deduplicator (cache plus the cross-instance store backstop)
//! - Telemetry writer and pipeline
//! - Rate limiter (transactional bucket counters)
//! - Configuration and metrics
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod config;
pub mod dedup_cache;
pub mod deduplicator;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod ports;
pub mod rate_limiter;
pub mod telemetry;

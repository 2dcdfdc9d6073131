//! Infrastructure layer - external adapters and integrations.
//!
//! This layer provides adapters for:
//! - Clock abstraction (system time vs mock)
//! - Storage implementations (sharded maps, document stores)
//! - The [`Guard`](guard::Guard) facade wiring pipelines to a store
//! - Tracing integration (Layer trait)

pub mod clock;
pub mod guard;
pub mod layer;
pub mod memory_store;
pub mod storage;
pub(crate) mod visitor;

#[cfg(feature = "redis-storage")]
pub mod redis_store;

/// Mock implementations for testing.
///
/// Controllable test doubles: a settable clock, a fault-injecting document
/// store and a layer capturing this crate's own diagnostics. Integration
/// tests and downstream crates use them to exercise failure paths.
pub mod mocks;

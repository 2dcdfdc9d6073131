//! Domain layer - pure logic with no I/O.
//!
//! This layer contains the core concepts and invariants of the guard:
//! - Log events and their redacted projection
//! - Payload redaction (key policies and value-shape detectors)
//! - Fingerprint computation
//! - The per-key dedupe/throttle state machine
//! - Rate limit buckets and counters
//! - Persisted record shapes
//!
//! Nothing in here touches a clock or a store; timestamps are passed in as
//! epoch milliseconds so every type is easy to test.

pub mod event;
pub mod fingerprint;
pub mod rate_limit;
pub mod record;
pub mod redaction;
pub mod throttle;

use std::time::Duration;

/// Convert a duration to whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

//! Time-bucketed rate limit arithmetic.
//!
//! A quota admits at most `capacity` requests per key within each fixed
//! bucket of `window` length. Counters live in the shared store under
//! `identityHash:timeBucket`; raw keys (IP addresses, user ids) are never
//! persisted.

use crate::domain::duration_millis;
use crate::domain::fingerprint::to_hex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Hex chars of the key digest kept in counter ids.
pub const IDENTITY_HASH_LEN: usize = 32;

/// A per-key cap within a time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitQuota {
    pub capacity: u32,
    pub window: Duration,
}

impl RateLimitQuota {
    /// Create a quota, rejecting zero capacity or a window shorter than 1ms.
    pub fn new(capacity: u32, window: Duration) -> Result<Self, InvalidQuota> {
        if capacity == 0 {
            return Err(InvalidQuota::ZeroCapacity);
        }
        if duration_millis(window) == 0 {
            return Err(InvalidQuota::ZeroWindow);
        }
        Ok(Self { capacity, window })
    }

    pub fn window_ms(&self) -> u64 {
        duration_millis(self.window)
    }

    /// Bucket index containing `now_ms`.
    pub fn bucket(&self, now_ms: u64) -> u64 {
        now_ms / self.window_ms().max(1)
    }

    /// Time left until the bucket containing `now_ms` ends.
    pub fn retry_after(&self, now_ms: u64) -> Duration {
        let window = self.window_ms().max(1);
        let next = (self.bucket(now_ms) + 1).saturating_mul(window);
        Duration::from_millis(next.saturating_sub(now_ms))
    }
}

/// Why a quota was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidQuota {
    ZeroCapacity,
    ZeroWindow,
}

impl fmt::Display for InvalidQuota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidQuota::ZeroCapacity => write!(f, "rate limit capacity must be greater than 0"),
            InvalidQuota::ZeroWindow => write!(f, "rate limit window must be at least 1ms"),
        }
    }
}

impl std::error::Error for InvalidQuota {}

/// Derive the stored identity of a rate limit key.
///
/// ```
/// use donation_guard::domain::rate_limit::identity_hash;
///
/// let id = identity_hash("203.0.113.7");
/// assert_eq!(id.len(), 32);
/// assert_eq!(id, identity_hash("203.0.113.7"));
/// ```
pub fn identity_hash(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut hex = to_hex(&digest);
    hex.truncate(IDENTITY_HASH_LEN);
    hex
}

/// Document id of the counter for `identity` in `bucket`.
pub fn counter_id(identity: &str, bucket: u64) -> String {
    format!("{}:{}", identity, bucket)
}

/// Stored counter for one key and bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitCounter {
    #[serde(default)]
    pub count: u32,
    #[serde(alias = "minuteBucket")]
    pub time_bucket: u64,
    #[serde(default)]
    pub updated_at: u64,
    #[serde(default)]
    pub expires_at: u64,
}

/// A request that fit within its quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allowed {
    /// Counter value after this request
    pub count: u32,
    /// Requests left in the current bucket
    pub remaining: u32,
}

/// A request rejected because the bucket is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denied {
    pub capacity: u32,
    /// Time until the next bucket opens
    pub retry_after: Duration,
}

impl fmt::Display for Denied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rate limit of {} exceeded, retry after {}ms",
            self.capacity,
            self.retry_after.as_millis()
        )
    }
}

/// Result of checking one request against its quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed(Allowed),
    Denied(Denied),
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed(_))
    }
}

impl RateLimitCounter {
    /// Decide on one request given the counter's current state.
    ///
    /// Returns the updated counter when the request is admitted. A denied
    /// request leaves the counter untouched.
    pub fn consume(
        current: Option<RateLimitCounter>,
        quota: &RateLimitQuota,
        now_ms: u64,
    ) -> (Option<RateLimitCounter>, RateLimitDecision) {
        let bucket = quota.bucket(now_ms);
        let count = current
            .filter(|c| c.time_bucket == bucket)
            .map(|c| c.count)
            .unwrap_or(0);

        if count >= quota.capacity {
            let denied = Denied {
                capacity: quota.capacity,
                retry_after: quota.retry_after(now_ms),
            };
            return (None, RateLimitDecision::Denied(denied));
        }

        let count = count + 1;
        let counter = RateLimitCounter {
            count,
            time_bucket: bucket,
            updated_at: now_ms,
            expires_at: now_ms.saturating_add(quota.window_ms().saturating_mul(2)),
        };
        let allowed = Allowed {
            count,
            remaining: quota.capacity - count,
        };
        (Some(counter), RateLimitDecision::Allowed(allowed))
    }
}

//! Error types surfaced by the application layer.

use crate::domain::rate_limit::{Denied, InvalidQuota};
use std::time::Duration;

/// Error returned by a [`DocumentStore`](crate::application::ports::DocumentStore) adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or rejected the call
    Unavailable(String),
    /// The call did not finish within the configured store timeout
    Timeout(Duration),
    /// A transaction kept conflicting and gave up after this many attempts
    Contention { attempts: u32 },
    /// The index backing an ordered query is missing or still building
    IndexUnavailable(String),
    /// A document could not be encoded or decoded
    Codec(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(reason) => write!(f, "store unavailable: {}", reason),
            StoreError::Timeout(limit) => {
                write!(f, "store call timed out after {}ms", limit.as_millis())
            }
            StoreError::Contention { attempts } => {
                write!(f, "transaction aborted after {} conflicting attempts", attempts)
            }
            StoreError::IndexUnavailable(index) => write!(f, "index unavailable: {}", index),
            StoreError::Codec(reason) => write!(f, "document codec error: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

/// Error returned when a request cannot pass the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// The key used up its quota for the current bucket
    Exceeded(Denied),
    /// The counter could not be read or written
    Storage(StoreError),
    /// The requested quota is invalid
    Validation(InvalidQuota),
}

impl RateLimitError {
    /// Whether the request was rejected by the quota itself.
    pub fn is_exceeded(&self) -> bool {
        matches!(self, RateLimitError::Exceeded(_))
    }
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitError::Exceeded(denied) => write!(f, "{}", denied),
            RateLimitError::Storage(e) => write!(f, "rate limit storage error: {}", e),
            RateLimitError::Validation(e) => write!(f, "invalid rate limit: {}", e),
        }
    }
}

impl std::error::Error for RateLimitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RateLimitError::Storage(e) => Some(e),
            RateLimitError::Validation(e) => Some(e),
            RateLimitError::Exceeded(_) => None,
        }
    }
}

impl From<StoreError> for RateLimitError {
    fn from(e: StoreError) -> Self {
        RateLimitError::Storage(e)
    }
}

impl From<InvalidQuota> for RateLimitError {
    fn from(e: InvalidQuota) -> Self {
        RateLimitError::Validation(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_store_error_display() {
        assert_eq!(
            StoreError::Timeout(Duration::from_millis(250)).to_string(),
            "store call timed out after 250ms"
        );
        assert_eq!(
            StoreError::Contention { attempts: 3 }.to_string(),
            "transaction aborted after 3 conflicting attempts"
        );
    }

    #[test]
    fn test_rate_limit_error_conversions() {
        let err: RateLimitError = StoreError::Unavailable("down".into()).into();
        assert!(matches!(err, RateLimitError::Storage(_)));
        assert!(err.source().is_some());
        assert!(!err.is_exceeded());

        let err: RateLimitError = InvalidQuota::ZeroCapacity.into();
        assert_eq!(
            err.to_string(),
            "invalid rate limit: rate limit capacity must be greater than 0"
        );

        let err = RateLimitError::Exceeded(Denied {
            capacity: 5,
            retry_after: Duration::from_secs(12),
        });
        assert!(err.is_exceeded());
        assert_eq!(err.to_string(), "rate limit of 5 exceeded, retry after 12000ms");
    }
}

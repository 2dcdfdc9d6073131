//! Guard configuration.
//!
//! Defaults match production tuning. Every knob can be overridden from the
//! environment with `DONATION_GUARD_*` variables:
//!
//! | Variable | Default |
//! |---|---|
//! | `DONATION_GUARD_DEDUPE_WINDOW_MS` | 30000 |
//! | `DONATION_GUARD_THROTTLE_WINDOW_MS` | 60000 |
//! | `DONATION_GUARD_THROTTLE_LIMIT_PER_KEY` | 15 |
//! | `DONATION_GUARD_MAX_CACHE_ENTRIES` | 1200 |
//! | `DONATION_GUARD_RATE_LIMIT_CAPACITY` | 5 |
//! | `DONATION_GUARD_RATE_LIMIT_WINDOW_MS` | 60000 |
//! | `DONATION_GUARD_STORE_TIMEOUT_MS` | 5000 |
//! | `DONATION_GUARD_RATE_LIMIT_STORAGE_POLICY` | `fail-closed` |

use crate::domain::duration_millis;
use crate::domain::rate_limit::{InvalidQuota, RateLimitQuota};
use crate::domain::throttle::ThrottleWindows;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Prefix of every environment variable read by [`GuardConfig::from_env`].
pub const ENV_PREFIX: &str = "DONATION_GUARD_";

/// How a rate limit check resolves when the store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageFailurePolicy {
    /// Treat the request as allowed
    FailOpen,
    /// Treat the request as denied
    #[default]
    FailClosed,
}

impl FromStr for StorageFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "fail-open" | "open" | "allow" => Ok(StorageFailurePolicy::FailOpen),
            "fail-closed" | "closed" | "deny" => Ok(StorageFailurePolicy::FailClosed),
            _ => Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_STORAGE_POLICY".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Error returned when configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Dedupe window must be at least 1ms
    ZeroDedupeWindow,
    /// Throttle window must be at least 1ms
    ZeroThrottleWindow,
    /// Throttle limit must be greater than zero
    ZeroThrottleLimit,
    /// Cache bound must be greater than zero
    ZeroMaxCacheEntries,
    /// Rate limit capacity must be greater than zero
    ZeroRateLimitCapacity,
    /// Rate limit window must be at least 1ms
    ZeroRateLimitWindow,
    /// Store timeout must be at least 1ms
    ZeroStoreTimeout,
    /// The dedupe window is longer than the throttle window
    DedupeExceedsThrottle { dedupe_ms: u64, throttle_ms: u64 },
    /// An environment variable could not be parsed
    InvalidValue { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroDedupeWindow => write!(f, "dedupe window must be at least 1ms"),
            ConfigError::ZeroThrottleWindow => write!(f, "throttle window must be at least 1ms"),
            ConfigError::ZeroThrottleLimit => write!(f, "throttle limit must be greater than 0"),
            ConfigError::ZeroMaxCacheEntries => {
                write!(f, "max cache entries must be greater than 0")
            }
            ConfigError::ZeroRateLimitCapacity => {
                write!(f, "rate limit capacity must be greater than 0")
            }
            ConfigError::ZeroRateLimitWindow => write!(f, "rate limit window must be at least 1ms"),
            ConfigError::ZeroStoreTimeout => write!(f, "store timeout must be at least 1ms"),
            ConfigError::DedupeExceedsThrottle {
                dedupe_ms,
                throttle_ms,
            } => write!(
                f,
                "dedupe window ({}ms) must not exceed throttle window ({}ms)",
                dedupe_ms, throttle_ms
            ),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value {:?} for {}{}", value, ENV_PREFIX, key)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<InvalidQuota> for ConfigError {
    fn from(e: InvalidQuota) -> Self {
        match e {
            InvalidQuota::ZeroCapacity => ConfigError::ZeroRateLimitCapacity,
            InvalidQuota::ZeroWindow => ConfigError::ZeroRateLimitWindow,
        }
    }
}

/// Tunables shared by the telemetry pipeline and the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardConfig {
    pub dedupe_window: Duration,
    pub throttle_window: Duration,
    pub throttle_limit_per_key: u32,
    pub max_cache_entries: usize,
    pub rate_limit_capacity_per_window: u32,
    pub rate_limit_window: Duration,
    /// Upper bound on every store call
    pub store_timeout: Duration,
    pub rate_limit_storage_policy: StorageFailurePolicy,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            dedupe_window: Duration::from_secs(30),
            throttle_window: Duration::from_secs(60),
            throttle_limit_per_key: 15,
            max_cache_entries: 1_200,
            rate_limit_capacity_per_window: 5,
            rate_limit_window: Duration::from_secs(60),
            store_timeout: Duration::from_secs(5),
            rate_limit_storage_policy: StorageFailurePolicy::FailClosed,
        }
    }
}

impl GuardConfig {
    /// Defaults overridden by any `DONATION_GUARD_*` environment variables.
    ///
    /// The result is validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading variables (without the
    /// prefix) through `lookup`.
    ///
    /// ```
    /// use donation_guard::GuardConfig;
    /// use std::time::Duration;
    ///
    /// let config = GuardConfig::from_lookup(|key| match key {
    ///     "THROTTLE_LIMIT_PER_KEY" => Some("3".to_string()),
    ///     "STORE_TIMEOUT_MS" => Some("750".to_string()),
    ///     _ => None,
    /// })
    /// .unwrap();
    /// assert_eq!(config.throttle_limit_per_key, 3);
    /// assert_eq!(config.store_timeout, Duration::from_millis(750));
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse::<u64>(&lookup, "DEDUPE_WINDOW_MS")? {
            config.dedupe_window = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&lookup, "THROTTLE_WINDOW_MS")? {
            config.throttle_window = Duration::from_millis(ms);
        }
        if let Some(limit) = parse(&lookup, "THROTTLE_LIMIT_PER_KEY")? {
            config.throttle_limit_per_key = limit;
        }
        if let Some(max) = parse(&lookup, "MAX_CACHE_ENTRIES")? {
            config.max_cache_entries = max;
        }
        if let Some(capacity) = parse(&lookup, "RATE_LIMIT_CAPACITY")? {
            config.rate_limit_capacity_per_window = capacity;
        }
        if let Some(ms) = parse::<u64>(&lookup, "RATE_LIMIT_WINDOW_MS")? {
            config.rate_limit_window = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&lookup, "STORE_TIMEOUT_MS")? {
            config.store_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("RATE_LIMIT_STORAGE_POLICY") {
            config.rate_limit_storage_policy = raw.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check every invariant the guard relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let dedupe_ms = duration_millis(self.dedupe_window);
        let throttle_ms = duration_millis(self.throttle_window);

        if dedupe_ms == 0 {
            return Err(ConfigError::ZeroDedupeWindow);
        }
        if throttle_ms == 0 {
            return Err(ConfigError::ZeroThrottleWindow);
        }
        if self.throttle_limit_per_key == 0 {
            return Err(ConfigError::ZeroThrottleLimit);
        }
        if self.max_cache_entries == 0 {
            return Err(ConfigError::ZeroMaxCacheEntries);
        }
        if self.rate_limit_capacity_per_window == 0 {
            return Err(ConfigError::ZeroRateLimitCapacity);
        }
        if duration_millis(self.rate_limit_window) == 0 {
            return Err(ConfigError::ZeroRateLimitWindow);
        }
        if duration_millis(self.store_timeout) == 0 {
            return Err(ConfigError::ZeroStoreTimeout);
        }
        if dedupe_ms > throttle_ms {
            return Err(ConfigError::DedupeExceedsThrottle {
                dedupe_ms,
                throttle_ms,
            });
        }
        Ok(())
    }

    /// The quota applied when a caller does not pass one.
    pub fn default_quota(&self) -> Result<RateLimitQuota, ConfigError> {
        Ok(RateLimitQuota::new(
            self.rate_limit_capacity_per_window,
            self.rate_limit_window,
        )?)
    }

    /// The dedupe state machine's windows.
    pub fn throttle_windows(&self) -> ThrottleWindows {
        ThrottleWindows {
            dedupe_window_ms: duration_millis(self.dedupe_window),
            throttle_window_ms: duration_millis(self.throttle_window),
            throttle_limit: self.throttle_limit_per_key,
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
    }
}

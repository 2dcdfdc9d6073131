//! Per-key dedupe and throttle state machine.
//!
//! Each `(route, fingerprint)` key moves through these states:
//!
//! - **Unknown** (no entry, or the throttle window has passed): the entry is
//!   reset to `{window_start: now, count: 1}` and the event is admitted.
//! - **Duplicate** (`now - last_seen < dedupe_window`): suppressed, count
//!   incremented.
//! - **Under cap** (`count < limit`): admitted, count incremented.
//! - **Capped** (`count >= limit`): suppressed, only `last_seen_at` moves.
//!
//! Timestamps are epoch milliseconds so the same arithmetic applies to
//! values read back from the shared store.

use std::fmt;

/// Windows and limits driving the throttle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleWindows {
    pub dedupe_window_ms: u64,
    pub throttle_window_ms: u64,
    pub throttle_limit: u32,
}

impl Default for ThrottleWindows {
    fn default() -> Self {
        Self {
            dedupe_window_ms: 30_000,
            throttle_window_ms: 60_000,
            throttle_limit: 15,
        }
    }
}

impl ThrottleWindows {
    /// Entries whose window started this long ago are stale.
    pub fn stale_after_ms(&self) -> u64 {
        self.throttle_window_ms.saturating_mul(2)
    }
}

/// Why an event was not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuppressReason {
    /// Seen by this instance inside the dedupe window
    Duplicate,
    /// This instance admitted the throttle limit for the current window
    ThrottleCapReached,
    /// A record with the same fingerprint was persisted recently by any instance
    SeenByPeer,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressReason::Duplicate => "duplicate",
            SuppressReason::ThrottleCapReached => "throttle_cap_reached",
            SuppressReason::SeenByPeer => "seen_by_peer",
        }
    }
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of observing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    Admit,
    Suppress(SuppressReason),
}

impl DedupDecision {
    pub fn is_admit(&self) -> bool {
        matches!(self, DedupDecision::Admit)
    }

    pub fn is_suppress(&self) -> bool {
        matches!(self, DedupDecision::Suppress(_))
    }
}

/// Cache entry for one `(route, fingerprint)` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DedupEntry {
    pub window_start: u64,
    pub count: u32,
    pub last_seen_at: u64,
    /// Monotonic insertion sequence, used to evict the oldest-inserted entry
    pub inserted_seq: u64,
}

impl DedupEntry {
    /// A vacant entry. The first `observe` resets it.
    pub fn vacant(inserted_seq: u64) -> Self {
        Self {
            inserted_seq,
            ..Self::default()
        }
    }

    /// Apply one observation at `now` and decide.
    pub fn observe(&mut self, now: u64, windows: &ThrottleWindows) -> DedupDecision {
        let vacant = self.count == 0;
        if vacant || now.saturating_sub(self.window_start) > windows.throttle_window_ms {
            self.window_start = now;
            self.count = 1;
            self.last_seen_at = now;
            return DedupDecision::Admit;
        }

        let since_last = now.saturating_sub(self.last_seen_at);
        self.last_seen_at = self.last_seen_at.max(now);

        if since_last < windows.dedupe_window_ms {
            self.count = self.count.saturating_add(1);
            return DedupDecision::Suppress(SuppressReason::Duplicate);
        }

        if self.count < windows.throttle_limit {
            self.count += 1;
            DedupDecision::Admit
        } else {
            DedupDecision::Suppress(SuppressReason::ThrottleCapReached)
        }
    }

    /// Whether the entry's window started at least twice the throttle window ago.
    pub fn is_stale(&self, now: u64, windows: &ThrottleWindows) -> bool {
        now.saturating_sub(self.window_start) > windows.stale_after_ms()
    }
}

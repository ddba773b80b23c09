//! Fixed-window counter state.

use std::time::Duration;

/// Current wall-clock time in milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// A counting window for one client key.
///
/// A window is dead once `now > reset_at_ms`; readers must treat a dead
/// window as absent and open a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Requests counted since the window opened
    pub count: u64,
    /// Absolute expiry, in unix epoch milliseconds
    pub reset_at_ms: u64,
}

impl Window {
    /// Open a new window holding the request that created it.
    pub fn open(now_ms: u64, duration: Duration) -> Self {
        let length = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self {
            count: 1,
            reset_at_ms: now_ms.saturating_add(length),
        }
    }

    /// Whether the window has expired at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.reset_at_ms
    }

    /// Count one more request against this window, or replace it with a
    /// fresh window if it has expired.
    pub fn advance(&mut self, now_ms: u64, duration: Duration) {
        if self.is_expired(now_ms) {
            *self = Window::open(now_ms, duration);
        } else {
            self.count = self.count.saturating_add(1);
        }
    }

    /// Remaining quota against `limit`.
    pub fn remaining(&self, limit: u64) -> u64 {
        limit.saturating_sub(self.count)
    }

    /// Whole seconds until the window resets, rounded up.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_at_ms.saturating_sub(now_ms).div_ceil(1000)
    }

    /// Reset time as unix epoch seconds, rounded up.
    pub fn reset_at_secs(&self) -> u64 {
        self.reset_at_ms.div_ceil(1000)
    }
}

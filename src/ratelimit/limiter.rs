//! Admission decision engine.

use std::sync::Arc;
use tracing::{debug, trace};

use super::key::ClientKey;
use super::policy::Policy;
use super::store::{MemoryStore, WindowStore};
use super::window::{now_millis, Window};

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// Seconds until the window resets, set only on denial
    pub retry_after_secs: Option<u64>,
    /// Requests counted in the current window, including this one
    pub current_count: u64,
    /// The policy's `max_requests`
    pub limit: u64,
    /// When the current window resets, unix epoch milliseconds
    pub reset_at_ms: u64,
}

impl Decision {
    /// Remaining quota in the current window.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.current_count)
    }

    /// Reset time as unix epoch seconds.
    pub fn reset_at_secs(&self) -> u64 {
        self.reset_at_ms.div_ceil(1000)
    }
}

/// Fixed-window rate limiter over a [`WindowStore`].
///
/// Each check counts the request, admitted or not. Up to `max_requests`
/// requests are admitted per window; the window restarts with a full quota
/// once it expires. Bursts straddling a window boundary can see up to twice
/// the limit in a short span.
pub struct RateLimiter {
    /// Counting windows indexed by client key
    store: Arc<dyn WindowStore>,
}

impl RateLimiter {
    /// Create a rate limiter over a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    /// Create a rate limiter over an existing store.
    pub fn with_store(store: Arc<dyn WindowStore>) -> Self {
        Self { store }
    }

    /// Count a request for `key` under `policy` at `now_ms` and decide
    /// whether to admit it.
    pub fn check(&self, key: &ClientKey, policy: &Policy, now_ms: u64) -> Decision {
        let window = self.store.hit(key, now_ms, policy.window);
        let admitted = window.count <= policy.max_requests;

        trace!(
            key = %key,
            count = window.count,
            limit = policy.max_requests,
            admitted,
            "Checked rate limit"
        );

        let retry_after_secs = if admitted {
            None
        } else {
            debug!(
                key = %key,
                count = window.count,
                limit = policy.max_requests,
                "Rate limit exceeded"
            );
            Some(window.retry_after_secs(now_ms))
        };

        Decision {
            admitted,
            retry_after_secs,
            current_count: window.count,
            limit: policy.max_requests,
            reset_at_ms: window.reset_at_ms,
        }
    }

    /// [`RateLimiter::check`] against the system clock.
    pub fn check_now(&self, key: &ClientKey, policy: &Policy) -> Decision {
        self.check(key, policy, now_millis())
    }

    /// Get the live window for a key, treating an expired one as absent.
    pub fn window(&self, key: &ClientKey, now_ms: u64) -> Option<Window> {
        self.store
            .get(key)
            .filter(|window| !window.is_expired(now_ms))
    }

    /// Remove expired windows. Returns the number removed.
    pub fn sweep(&self, now_ms: u64) -> usize {
        self.store.sweep(now_ms)
    }

    /// Get the number of stored windows, live or expired.
    pub fn window_count(&self) -> usize {
        self.store.len()
    }

    pub fn store(&self) -> &Arc<dyn WindowStore> {
        &self.store
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

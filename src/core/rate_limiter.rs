//! Rate limiting module to prevent packet spam

use std::time::{Duration, Instant};

/// Per-connection sliding window packet counter
#[derive(Debug, Clone)]
pub struct RateKeeper {
    window_start: Instant,
    occurrences: i64,
}

impl RateKeeper {
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            occurrences: 0,
        }
    }

    /// Count one event and check it against `limit` events per `window`
    pub fn allow(&mut self, window: Duration, limit: i64) -> bool {
        self.allow_at(Instant::now(), window, limit)
    }

    /// Same as [`RateKeeper::allow`] with an explicit clock reading
    pub fn allow_at(&mut self, now: Instant, window: Duration, limit: i64) -> bool {
        if now.saturating_duration_since(self.window_start) > window {
            self.occurrences = 0;
            self.window_start = now;
        }

        self.occurrences += 1;
        self.occurrences <= limit
    }

    /// Push the counter far below zero so an offender is not re-flagged
    /// (and re-logged) on every following packet
    pub fn cooldown(&mut self, limit: i64) {
        self.occurrences = -limit;
    }

    /// Events counted in the current window
    pub fn occurrences(&self) -> i64 {
        self.occurrences
    }
}

impl Default for RateKeeper {
    fn default() -> Self {
        Self::new()
    }
}

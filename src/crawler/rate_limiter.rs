//! Per-second request ceiling
//!
//! The limiter counts fetch attempts rather than timing each one: every
//! `max_requests_per_second`-th attempt waits for the rest of the current
//! one-second window before a new window opens.

use std::time::Duration;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

/// Caps fetch attempts per one-second window
#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: u64,
    window_start: Option<Instant>,
}

impl RateLimiter {
    pub fn new(max_requests_per_second: u32) -> Self {
        Self {
            max_per_window: u64::from(max_requests_per_second.max(1)),
            window_start: None,
        }
    }

    /// Waits, if needed, before attempt number `attempt_index` (zero-based)
    ///
    /// Blocks only when `attempt_index` is a positive multiple of the ceiling,
    /// and then only for what is left of the current window.
    ///
    /// # Returns
    ///
    /// How long the caller was held back
    pub async fn gate(&mut self, attempt_index: u64) -> Duration {
        let now = Instant::now();
        let window_start = *self.window_start.get_or_insert(now);

        if attempt_index == 0 || attempt_index % self.max_per_window != 0 {
            return Duration::ZERO;
        }

        let remaining = WINDOW.saturating_sub(now.duration_since(window_start));
        if !remaining.is_zero() {
            tracing::debug!(
                "Rate ceiling of {}/s reached, waiting {:?}",
                self.max_per_window,
                remaining
            );
            tokio::time::sleep(remaining).await;
        }

        self.window_start = Some(Instant::now());
        remaining
    }
}

//! Bounded-delay wrapper with exponential backoff for upstream calls
//! (spec §4.1).
//!
//! Not `Sync` — one instance per job that needs it, exactly as spec'd
//! ("not goroutine-safe"). Each call sleeps `current_delay` before
//! attempting; on success `current_delay` resets to `base_delay`. On a
//! classified-rate-limited failure, `current_delay` is multiplied by
//! `backoff_multiplier` (capped at `max_delay`) and the call is retried, up
//! to `max_attempts` times. Any other error returns immediately.

use std::time::Duration;

use crate::kernel::errors::CoreError;

/// `{base_delay, current_delay, backoff_multiplier, max_delay, max_attempts}`
/// — a per-wrapper, not per-call, value (spec §3 "RateLimitState").
#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub base_delay: Duration,
    pub current_delay: Duration,
    pub backoff_multiplier: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(0),
            current_delay: Duration::from_millis(0),
            backoff_multiplier: 2,
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

/// Classifies whether an error should trigger backoff-and-retry or be
/// returned immediately (spec §4.1, §4.2's 429 handling).
pub trait RateLimitClassify {
    fn is_rate_limited(&self) -> bool;
    /// An explicit wait duration parsed from the error (e.g. a 429's
    /// `Retry-After`), if one is available. When present, it is used
    /// instead of the exponential backoff schedule for this attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

pub struct RateLimiter {
    state: RateLimitState,
}

impl RateLimiter {
    pub fn new(state: RateLimitState) -> Self {
        Self { state }
    }

    /// Runs `f`, retrying on rate-limited failures per the configured
    /// backoff schedule, up to `max_attempts` attempts.
    pub async fn run<F, Fut, T, E>(&mut self, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: RateLimitClassify,
    {
        self.state.current_delay = self.state.base_delay;

        for attempt in 1..=self.state.max_attempts {
            if !self.state.current_delay.is_zero() {
                tokio::time::sleep(self.state.current_delay).await;
            }

            match f().await {
                Ok(v) => {
                    self.state.current_delay = self.state.base_delay;
                    return Ok(v);
                }
                Err(e) if e.is_rate_limited() && attempt < self.state.max_attempts => {
                    self.state.current_delay = e.retry_after().unwrap_or_else(|| {
                        let scaled = self.state.current_delay.as_millis() as u64
                            * self.state.backoff_multiplier as u64;
                        let scaled = scaled.max(1);
                        Duration::from_millis(scaled).min(self.state.max_delay)
                    });
                    tracing::warn!(
                        attempt,
                        next_delay_ms = self.state.current_delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        // Unreachable in practice: the loop always returns on the final
        // attempt's Ok/Err arm. Kept as a defensive fallback call so the
        // compiler sees every path return.
        f().await
    }
}

impl RateLimitClassify for CoreError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, CoreError::RateLimited { .. })
    }
}

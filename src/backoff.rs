//! # Retry delay computation.
//!
//! Pure policy turning a record's consecutive-failure count into the
//! delay before its next start attempt:
//!
//! - failure retries grow as `error_delay * factor^(attempts - 1)`,
//!   clamped to `max_delay`;
//! - a `factor` of `0.0` means no growth (every retry waits
//!   `error_delay`);
//! - the chosen base delay is fuzzed by a uniform factor in `[0.9, 1.1]`
//!   so that a herd of failing workers does not retry in lockstep.
//!
//! The exponential is computed in floating point; any overflow lands on
//! `max_delay` rather than wrapping.

use std::time::Duration;

use rand::Rng;

/// Delay policy derived from the engine configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Backoff {
    /// Base delay after a failure.
    pub error_delay: Duration,
    /// Delay for bounce and dependency-change restarts.
    pub bounce_delay: Duration,
    /// Growth factor per consecutive failure; `0.0` means no growth.
    pub factor: f64,
    /// Run duration after which the failure count resets.
    pub reset_time: Duration,
    /// Upper clamp on computed delays; zero disables the clamp.
    pub max_delay: Duration,
}

impl Backoff {
    /// Returns the unfuzzed delay before retry number `attempts`
    /// (`attempts >= 1` counts consecutive failures including the one
    /// just observed).
    pub(crate) fn retry_delay(&self, attempts: u64) -> Duration {
        let factor = if self.factor == 0.0 { 1.0 } else { self.factor };
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u64) as i32;
        let seconds = self.error_delay.as_secs_f64() * factor.powi(exponent);

        let max = if self.max_delay.is_zero() {
            Duration::MAX
        } else {
            self.max_delay
        };
        if !seconds.is_finite() || seconds >= max.as_secs_f64() {
            return max;
        }
        Duration::try_from_secs_f64(seconds).unwrap_or(max)
    }
}

/// Applies the uniform `[0.9, 1.1]` fuzz to a scheduled delay.
pub(crate) fn fuzz(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let factor = rand::rng().random_range(0.9..=1.1);
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(delay)
}

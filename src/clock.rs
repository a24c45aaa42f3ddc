//! # Injected time source.
//!
//! All engine timing (backoff delays, run-time measurement for backoff
//! reset) goes through a [`Clock`] so that tests can drive time
//! deterministically. Production code uses [`SystemClock`]; tests use
//! [`TestClock`](crate::testing::TestClock).

use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Time source consumed by the engine.
///
/// Implementations must be cheap to clone behind an `Arc` and safe to call
/// from any task. `sleep` futures are dropped freely (they race against
/// abort tokens inside `select!`), so implementations must be cancel-safe.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Completes after `duration` has elapsed on this clock.
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock [`Clock`] backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

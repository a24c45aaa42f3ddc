//! # Test support: a manually advanced clock.
//!
//! [`TestClock`] implements [`Clock`] with virtual time. Sleepers register
//! a waiter and park until [`TestClock::advance`] moves the clock past
//! their deadline. [`TestClock::wait_advance`] first waits (in real time,
//! up to a patience window) for an expected number of registered waiters,
//! so a test can be sure the engine has reached its sleeping state before
//! time moves.
//!
//! A sleeper that is dropped mid-wait (for example a scheduled start that
//! lost a `select!` race against its abort token) stays registered until
//! its deadline passes; tests that abort scheduled work must account for
//! the abandoned waiter.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::clock::Clock;

struct Waiter {
    deadline: Duration,
    tx: oneshot::Sender<()>,
}

struct Inner {
    offset: Duration,
    waiters: Vec<Waiter>,
}

/// Virtual-time [`Clock`] for deterministic scheduling tests.
pub struct TestClock {
    base: Instant,
    inner: Mutex<Inner>,
}

impl TestClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            inner: Mutex::new(Inner {
                offset: Duration::ZERO,
                waiters: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Moves the clock forward, waking every sleeper whose deadline has
    /// been reached.
    pub fn advance(&self, step: Duration) {
        let due = {
            let mut inner = self.lock();
            inner.offset += step;
            let offset = inner.offset;
            let (due, remaining): (Vec<Waiter>, Vec<Waiter>) = inner
                .waiters
                .drain(..)
                .partition(|waiter| waiter.deadline <= offset);
            inner.waiters = remaining;
            due
        };
        for waiter in due {
            // The sleeper may have been dropped; that is fine.
            let _ = waiter.tx.send(());
        }
    }

    /// Returns the number of currently registered sleepers.
    pub fn waiter_count(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Waits (in real time, up to `patience`) until at least `waiters`
    /// sleepers are registered, then advances the clock by `step`.
    ///
    /// Fails if the expected sleepers never show up, which usually means
    /// the code under test did not reach its scheduling point.
    pub async fn wait_advance(
        &self,
        step: Duration,
        patience: Duration,
        waiters: usize,
    ) -> anyhow::Result<()> {
        let give_up = Instant::now() + patience;
        loop {
            let have = self.waiter_count();
            if have >= waiters {
                break;
            }
            if Instant::now() >= give_up {
                anyhow::bail!("timed out waiting for {waiters} waiters, have {have}");
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        self.advance(step);
        Ok(())
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base + self.lock().offset
    }

    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let rx = {
            let mut inner = self.lock();
            let (tx, rx) = oneshot::channel();
            let deadline = inner.offset + duration;
            inner.waiters.push(Waiter { deadline, tx });
            rx
        };
        // Err means the clock was dropped; treat as woken.
        let _ = rx.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn sleep_wakes_only_after_deadline() {
        let clock = Arc::new(TestClock::new());
        let sleeper = {
            let clock = Arc::clone(&clock);
            tokio::spawn(async move { clock.sleep(Duration::from_secs(2)).await })
        };

        clock
            .wait_advance(Duration::from_secs(1), Duration::from_secs(1), 1)
            .await
            .unwrap();
        assert_eq!(clock.waiter_count(), 1);

        clock.advance(Duration::from_secs(1));
        sleeper.await.unwrap();
        assert_eq!(clock.waiter_count(), 0);
    }

    #[tokio::test]
    async fn abandoned_sleeper_stays_registered() {
        let clock = Arc::new(TestClock::new());
        {
            let sleeper_clock = Arc::clone(&clock);
            let handle =
                tokio::spawn(async move { sleeper_clock.sleep(Duration::from_secs(5)).await });
            clock
                .wait_advance(Duration::ZERO, Duration::from_secs(1), 1)
                .await
                .unwrap();
            handle.abort();
        }
        assert_eq!(clock.waiter_count(), 1);
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.waiter_count(), 0);
    }

    #[tokio::test]
    async fn now_tracks_advances() {
        let clock = TestClock::new();
        let before = clock.now();
        clock.advance(Duration::from_secs(30));
        assert_eq!(clock.now() - before, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn wait_advance_times_out_without_waiters() {
        let clock = TestClock::new();
        let res = clock
            .wait_advance(Duration::from_secs(1), Duration::from_millis(20), 1)
            .await;
        assert!(res.is_err());
    }
}

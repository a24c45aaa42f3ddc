//! # Worker abstraction.
//!
//! This module defines the [`Worker`] trait: the running object a
//! manifold's factory hands back to the engine. The engine drives a
//! worker through exactly two capabilities — an idempotent stop request
//! ([`Worker::kill`]) and a blocking wait for its terminal error
//! ([`Worker::wait`]) — plus an optional self-report for diagnostics.
//!
//! The engine never restarts a worker object; a restart is a fresh
//! factory invocation producing a fresh worker.

use std::any::Any;

use async_trait::async_trait;

/// Upcast helper so output projectors can downcast a live worker to its
/// concrete type. Blanket-implemented for every `'static` type; worker
/// implementations get it for free.
pub trait AsAny {
    /// Returns `self` as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// # A running worker hosted by the engine.
///
/// Contract:
/// - [`kill`](Worker::kill) requests a stop. It must be idempotent and
///   must never block; the worker winds down in its own time.
/// - [`wait`](Worker::wait) blocks until the worker has fully stopped and
///   returns its terminal error (`Ok(())` for a clean exit). The engine
///   awaits it exactly once per worker, concurrently with possible
///   `kill` calls.
/// - [`report`](Worker::report) optionally describes the worker's current
///   state for engine introspection. It must return quickly.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use manifold::Worker;
///
/// struct Ticker {
///     stop: CancellationToken,
/// }
///
/// #[async_trait]
/// impl Worker for Ticker {
///     fn kill(&self) {
///         self.stop.cancel();
///     }
///
///     async fn wait(&self) -> anyhow::Result<()> {
///         self.stop.cancelled().await;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Worker: AsAny + Send + Sync + 'static {
    /// Requests the worker to stop. Idempotent, never blocks.
    fn kill(&self);

    /// Blocks until the worker has stopped; returns its terminal error.
    async fn wait(&self) -> anyhow::Result<()>;

    /// Self-description for diagnostics. Must be fast and non-blocking.
    fn report(&self) -> Option<serde_json::Value> {
        None
    }
}

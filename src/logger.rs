//! # Injected structured logger.
//!
//! The engine never logs through a global: it talks to the [`Logger`]
//! collaborator from its configuration. [`TracingLogger`] is the default
//! implementation, forwarding every line to the [`tracing`] ecosystem
//! under the `manifold` target.

use std::fmt;

/// Structured logger consumed by the engine.
///
/// Implementations must be cheap: the engine logs from its dispatcher,
/// so a slow logger slows every worker transition.
pub trait Logger: Send + Sync + 'static {
    /// Very chatty diagnostics (per-resource requests, scheduling).
    fn trace(&self, message: fmt::Arguments<'_>);
    /// Lifecycle transitions (installs, starts, stops).
    fn debug(&self, message: fmt::Arguments<'_>);
    /// Notable but expected events.
    fn info(&self, message: fmt::Arguments<'_>);
    /// Worker errors the engine will retry.
    fn error(&self, message: fmt::Arguments<'_>);
}

/// [`Logger`] forwarding to [`tracing`] under the `manifold` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn trace(&self, message: fmt::Arguments<'_>) {
        tracing::trace!(target: "manifold", "{message}");
    }

    fn debug(&self, message: fmt::Arguments<'_>) {
        tracing::debug!(target: "manifold", "{message}");
    }

    fn info(&self, message: fmt::Arguments<'_>) {
        tracing::info!(target: "manifold", "{message}");
    }

    fn error(&self, message: fmt::Arguments<'_>) {
        tracing::error!(target: "manifold", "{message}");
    }
}

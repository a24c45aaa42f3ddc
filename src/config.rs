//! # Engine configuration.
//!
//! [`EngineConfig`] bundles the error policies, restart delays, and
//! injected collaborators (clock, metrics, logger) an engine needs.
//!
//! Validation reports the *first* failing rule;
//! [`Engine::new`](crate::Engine::new) prefixes it with `invalid config:`.
//! The rule messages are part of the public contract.
//!
//! ## Field semantics
//! - `error_delay`: base delay before retrying a failed worker.
//! - `bounce_delay`: delay for non-error restarts (bounce, dependency
//!   change). Usually much shorter than `error_delay`.
//! - `backoff_factor`: multiplicative growth per consecutive failure.
//!   `0.0` means no growth (every retry waits `error_delay`); any other
//!   value must be `>= 1`.
//! - `backoff_reset_time`: a worker that ran at least this long before
//!   failing retries at the base delay again.
//! - `max_delay`: upper clamp on the computed delay (before fuzz).

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::ConfigError;
use crate::logger::Logger;
use crate::manifold::FilterFn;
use crate::metrics::Metrics;

/// Decides whether a worker error must bring the whole engine down.
pub type IsFatalFn = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Folds a fatal error into the accumulated terminal error.
///
/// Called as `worst_error(new, accumulated)` for every fatal error the
/// engine observes; `accumulated` is `None` for the first one. Must be
/// commutative: when several fatal errors race, the engine guarantees a
/// deterministic terminal error only up to argument order.
pub type WorstErrorFn =
    Arc<dyn Fn(anyhow::Error, Option<anyhow::Error>) -> anyhow::Error + Send + Sync>;

/// Configuration for [`Engine::new`](crate::Engine::new).
///
/// The required collaborators are modeled as `Option`s so a config can be
/// built up field by field; [`validate`](EngineConfig::validate) rejects
/// any that are still missing.
#[derive(Clone, Default)]
pub struct EngineConfig {
    /// Classifier for engine-fatal errors. Required.
    pub is_fatal: Option<IsFatalFn>,
    /// Commutative aggregator over fatal errors. Required.
    pub worst_error: Option<WorstErrorFn>,
    /// Optional rewriter applied to the engine's terminal error.
    pub filter: Option<FilterFn>,
    /// Base delay after a failed start or worker error.
    pub error_delay: Duration,
    /// Delay for non-error restarts (bounce, dependency change).
    pub bounce_delay: Duration,
    /// Multiplicative delay growth per consecutive failure; `0.0` or `>= 1`.
    pub backoff_factor: f64,
    /// Successful run duration that resets the backoff counter.
    pub backoff_reset_time: Duration,
    /// Upper clamp on the computed delay.
    pub max_delay: Duration,
    /// Time source. Required.
    pub clock: Option<Arc<dyn Clock>>,
    /// Observer for start attempts. Required.
    pub metrics: Option<Arc<dyn Metrics>>,
    /// Structured logger. Required.
    pub logger: Option<Arc<dyn Logger>>,
}

impl EngineConfig {
    /// Checks the configuration, reporting the first failing rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_fatal.is_none() {
            return Err(ConfigError::IsFatalNotSpecified);
        }
        if self.worst_error.is_none() {
            return Err(ConfigError::WorstErrorNotSpecified);
        }
        if self.backoff_factor != 0.0 && !(self.backoff_factor >= 1.0) {
            return Err(ConfigError::BackoffFactorTooSmall(self.backoff_factor));
        }
        if self.clock.is_none() {
            return Err(ConfigError::MissingClock);
        }
        if self.metrics.is_none() {
            return Err(ConfigError::MissingMetrics);
        }
        if self.logger.is_none() {
            return Err(ConfigError::MissingLogger);
        }
        Ok(())
    }
}

//! # Error types used by the engine and its workers.
//!
//! Three groups live here:
//!
//! - Sentinel errors ([`ErrMissing`], [`ErrBounce`], [`ErrUninstall`]) that
//!   workers and factories hand back to the engine to request special
//!   treatment. Their identity survives wrapping: the engine recognizes
//!   them anywhere in an [`anyhow`] cause chain.
//! - [`EngineError`] errors raised by engine operations themselves
//!   (installation, configuration).
//! - [`ValidationError`] / [`ConfigError`] typed failures from catalog and
//!   config validation. Their messages are part of the public contract.

use thiserror::Error;

/// A requested dependency is not available.
///
/// Returned by [`Context::get`](crate::Context::get) when a name is not
/// declared or not currently running. A factory that propagates this is
/// treated as "not startable yet" rather than failed: no backoff penalty
/// is applied and the next attempt waits for a dependency change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("dependency not available")]
pub struct ErrMissing;

/// The worker wants a clean restart.
///
/// A worker exiting with this error (possibly wrapped) is restarted after
/// the bounce delay, and its dependents are bounced as on any other exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("restart immediately")]
pub struct ErrBounce;

/// The worker wants its manifold removed from the engine.
///
/// The record is deleted outright; dependents observe the departure and
/// restart as usual. Installing a fresh manifold under the same name
/// later is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("resource permanently unavailable")]
pub struct ErrUninstall;

/// A start attempt was aborted by the engine before it produced a worker.
///
/// Internal: surfaces from [`Context::get`](crate::Context::get) after the
/// abort token fired, and from the scheduling delay losing the race
/// against the abort. Classified as "reschedule with the bounce delay".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("start attempt aborted")]
pub(crate) struct ErrAborted;

pub(crate) fn is_aborted(err: &anyhow::Error) -> bool {
    err.chain().any(|c| c.downcast_ref::<ErrAborted>().is_some())
}

/// Returns true if `err`'s cause chain contains [`ErrMissing`].
pub fn is_missing(err: &anyhow::Error) -> bool {
    err.chain().any(|c| c.downcast_ref::<ErrMissing>().is_some())
}

/// Returns true if `err`'s cause chain contains [`ErrBounce`].
pub fn is_bounce(err: &anyhow::Error) -> bool {
    err.chain().any(|c| c.downcast_ref::<ErrBounce>().is_some())
}

/// Returns true if `err`'s cause chain contains [`ErrUninstall`].
pub fn is_uninstall(err: &anyhow::Error) -> bool {
    err.chain().any(|c| c.downcast_ref::<ErrUninstall>().is_some())
}

/// Catalog validation failure.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The transitive dependency graph contains a cycle.
    ///
    /// `considering` is the DFS stack at the moment the back-edge was
    /// found, sorted for reproducible messages.
    #[error("cycle detected at {name:?} (considering: {considering:?})")]
    Cycle {
        /// Name at which the back-edge closed the cycle.
        name: String,
        /// Names on the DFS stack when the cycle was detected.
        considering: Vec<String>,
    },
}

/// Configuration validation failure.
///
/// [`EngineConfig::validate`](crate::EngineConfig::validate) reports the
/// first rule that fails; the messages below are contractual.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("IsFatal not specified")]
    IsFatalNotSpecified,
    #[error("WorstError not specified")]
    WorstErrorNotSpecified,
    #[error("BackoffFactor {0} must be >= 1")]
    BackoffFactorTooSmall(f64),
    #[error("missing Clock not valid")]
    MissingClock,
    #[error("missing Metrics not valid")]
    MissingMetrics,
    #[error("missing Logger not valid")]
    MissingLogger,
}

/// Errors produced by engine operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EngineError {
    /// The configuration handed to [`Engine::new`](crate::Engine::new)
    /// failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The engine is dying or dead and accepts no new manifolds.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// A manifold with this name is already installed.
    #[error("{name:?} manifold already installed")]
    AlreadyInstalled {
        /// The duplicate manifold name.
        name: String,
    },

    /// Installing the manifold would close a dependency cycle.
    #[error("cannot install {name:?} manifold: {source}")]
    Install {
        /// The rejected manifold name.
        name: String,
        /// The underlying validation failure.
        source: ValidationError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context as _;

    #[test]
    fn sentinel_identity_survives_wrapping() {
        let err = anyhow::Error::new(ErrMissing).context("\"db\" not declared");
        assert!(is_missing(&err));
        assert!(!is_bounce(&err));
        assert!(!is_uninstall(&err));

        let err = anyhow::Error::new(ErrBounce)
            .context("first wrap")
            .context("second wrap");
        assert!(is_bounce(&err));
    }

    #[test]
    fn plain_errors_are_no_sentinel() {
        let err = anyhow::anyhow!("ZAP");
        assert!(!is_missing(&err));
        assert!(!is_bounce(&err));
        assert!(!is_uninstall(&err));
    }

    #[test]
    fn contract_messages() {
        let err = EngineError::AlreadyInstalled {
            name: "some-task".into(),
        };
        assert_eq!(err.to_string(), r#""some-task" manifold already installed"#);

        let err = EngineError::Install {
            name: "robin-hood".into(),
            source: ValidationError::Cycle {
                name: "robin-hood".into(),
                considering: vec!["friar-tuck".into(), "robin-hood".into()],
            },
        };
        let msg = err.to_string();
        assert!(msg.starts_with(r#"cannot install "robin-hood" manifold: cycle detected at"#));

        assert_eq!(
            EngineError::from(ConfigError::BackoffFactorTooSmall(0.9)).to_string(),
            "invalid config: BackoffFactor 0.9 must be >= 1",
        );
    }
}

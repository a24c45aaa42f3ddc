//! # Per-start resource resolution.
//!
//! Each start attempt receives a fresh [`Context`]: a snapshot of the
//! declared dependencies that were running when the attempt launched,
//! plus an abort signal. The context is consumed by the factory and is
//! dead once the factory returns; workers must not stash it.
//!
//! Every [`Context::get`] call — hit or miss — is recorded. The set of
//! names a start attempt touched becomes the restart-sensitivity set of
//! the resulting worker: only changes to those names disturb it later.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrAborted, ErrMissing};
use crate::logger::Logger;
use crate::manifold::OutputFn;
use crate::worker::Worker;

/// One recorded dependency access from a start attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceAccess {
    /// Requested dependency name.
    pub name: String,
    /// Whether the dependency resolved at the time of the request.
    pub available: bool,
}

/// A started dependency captured for a start attempt.
pub(crate) struct Dependency {
    pub(crate) worker: Arc<dyn Worker>,
    pub(crate) output: Option<OutputFn>,
}

/// # Resource context handed to a manifold's factory.
///
/// Lets the starting worker query its *declared* dependencies by name and
/// observe the engine's interest in this start attempt via
/// [`abort`](Context::abort).
pub struct Context {
    name: String,
    inputs: Vec<String>,
    snapshot: HashMap<String, Dependency>,
    log: Arc<Mutex<Vec<ResourceAccess>>>,
    abort: CancellationToken,
    logger: Arc<dyn Logger>,
}

impl Context {
    pub(crate) fn new(
        name: String,
        inputs: Vec<String>,
        snapshot: HashMap<String, Dependency>,
        log: Arc<Mutex<Vec<ResourceAccess>>>,
        abort: CancellationToken,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            name,
            inputs,
            snapshot,
            log,
            abort,
            logger,
        }
    }

    /// Resolves the dependency `name`.
    ///
    /// - Fails with a wrapped [`ErrMissing`] if `name` is not among the
    ///   starting manifold's declared inputs, or if it is declared but not
    ///   currently running.
    /// - If the dependency manifold has an output projector, the projector
    ///   runs with whatever `target` was passed — `None` included — and
    ///   its result is returned verbatim, so a projector can veto even a
    ///   pure existence check.
    /// - A manifold without a projector satisfies an existence check
    ///   (`target = None`) but cannot satisfy a typed request and fails
    ///   with [`ErrMissing`].
    ///
    /// After the engine has aborted this start attempt, every call fails.
    pub fn get(&self, name: &str, target: Option<&mut dyn Any>) -> anyhow::Result<()> {
        self.logger.trace(format_args!(
            "{:?} manifold requested {name:?} resource",
            self.name
        ));
        if self.abort.is_cancelled() {
            return Err(anyhow::Error::new(ErrAborted));
        }
        let result = self.resolve(name, target);
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ResourceAccess {
                name: name.to_string(),
                available: result.is_ok(),
            });
        result
    }

    /// Returns the token the engine cancels when it no longer wants this
    /// start attempt: the engine is shutting down, or one of the declared
    /// inputs changed state while the factory was still running.
    ///
    /// A factory that waits on slow resources should `select!` against
    /// this token to enable responsive restarts.
    pub fn abort(&self) -> &CancellationToken {
        &self.abort
    }

    fn resolve(&self, name: &str, target: Option<&mut dyn Any>) -> anyhow::Result<()> {
        if !self.inputs.iter().any(|i| i == name) {
            return Err(anyhow::Error::new(ErrMissing).context(format!("{name:?} not declared")));
        }
        let Some(dependency) = self.snapshot.get(name) else {
            return Err(anyhow::Error::new(ErrMissing));
        };
        match (&dependency.output, target) {
            (Some(output), target) => output(dependency.worker.as_ref(), target),
            (None, None) => Ok(()),
            (None, Some(_)) => Err(anyhow::Error::new(ErrMissing)
                .context(format!("{name:?} manifold declares no output"))),
        }
    }

    pub(crate) fn take_log(log: &Arc<Mutex<Vec<ResourceAccess>>>) -> Vec<ResourceAccess> {
        log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

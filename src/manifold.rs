//! # Manifold declarations and catalog validation.
//!
//! A [`Manifold`] declares a named worker: which other manifolds it may
//! consult at start time ([`Manifold::inputs`]), the factory producing
//! the worker ([`Manifold::start`]), an optional projector exposing the
//! running worker to dependents ([`Manifold::output`]), and an optional
//! error rewriter applied before the engine classifies the worker's
//! errors ([`Manifold::filter`]).
//!
//! A [`Manifolds`] catalog maps names to manifolds. [`validate`] rejects
//! any catalog whose transitive dependency graph contains a cycle; a
//! manifold depending on itself is a cycle.
//!
//! ## Rules
//! - Inputs may name manifolds that are not (yet) installed; the worker
//!   simply cannot resolve them until they are.
//! - Validation is deterministic: repeated calls over the same catalog
//!   return the same outcome.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::engine::{Context, Engine};
use crate::error::{EngineError, ValidationError};
use crate::worker::Worker;

/// Factory invoked for every start attempt. Receives a fresh [`Context`]
/// and either produces a running [`Worker`] or explains why it cannot.
pub type StartFn = Arc<dyn Fn(Context) -> BoxFuture<'static, anyhow::Result<Box<dyn Worker>>> + Send + Sync>;

/// Projects a running worker into a typed slot for a dependent.
///
/// The projector downcasts the worker (via
/// [`AsAny::as_any`](crate::AsAny::as_any)) and writes the value the
/// dependent expects into `target`. A `None` target is a pure existence
/// check: the projector still runs and may still veto the dependency by
/// returning an error. The engine never inspects the projected value.
pub type OutputFn =
    Arc<dyn Fn(&dyn Worker, Option<&mut dyn Any>) -> anyhow::Result<()> + Send + Sync>;

/// Rewrites an error before the engine observes it.
pub type FilterFn = Arc<dyn Fn(anyhow::Error) -> anyhow::Error + Send + Sync>;

/// # Declaration of a named worker.
///
/// Immutable once installed. Cloning is cheap (shared function objects).
///
/// # Example
/// ```
/// use manifold::{Manifold, start_fn};
///
/// let manifold = Manifold::new(start_fn(|ctx| async move {
///     ctx.get("db", None)?;
///     anyhow::bail!("factory not wired up yet")
/// }))
/// .with_inputs(["db"]);
/// assert_eq!(manifold.inputs, ["db"]);
/// ```
#[derive(Clone)]
pub struct Manifold {
    /// Names of the manifolds this one may consult at start time.
    pub inputs: Vec<String>,
    /// Worker factory.
    pub start: StartFn,
    /// Optional projector exposing the running worker to dependents.
    pub output: Option<OutputFn>,
    /// Optional rewriter applied to this manifold's errors before the
    /// engine classifies them.
    pub filter: Option<FilterFn>,
}

impl Manifold {
    /// Creates a manifold with no inputs, no output, and no filter.
    pub fn new(start: StartFn) -> Self {
        Self {
            inputs: Vec::new(),
            start,
            output: None,
            filter: None,
        }
    }

    /// Sets the declared inputs.
    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the output projector.
    pub fn with_output(mut self, output: OutputFn) -> Self {
        self.output = Some(output);
        self
    }

    /// Sets the error filter.
    pub fn with_filter(mut self, filter: FilterFn) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Wraps an async closure as a [`StartFn`].
pub fn start_fn<F, Fut>(f: F) -> StartFn
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Box<dyn Worker>>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// A catalog of named manifolds.
pub type Manifolds = HashMap<String, Manifold>;

/// Checks that the catalog's transitive dependency graph is acyclic.
///
/// Inputs naming manifolds absent from the catalog are permitted; they
/// cannot participate in a cycle.
pub fn validate(manifolds: &Manifolds) -> Result<(), ValidationError> {
    let mut done: HashSet<&str> = HashSet::new();
    let mut names: Vec<&String> = manifolds.keys().collect();
    names.sort();
    for name in names {
        let mut considering = Vec::new();
        check_acyclic(name, manifolds, &mut done, &mut considering)?;
    }
    Ok(())
}

fn check_acyclic<'a>(
    name: &'a str,
    manifolds: &'a Manifolds,
    done: &mut HashSet<&'a str>,
    considering: &mut Vec<&'a str>,
) -> Result<(), ValidationError> {
    if done.contains(name) {
        return Ok(());
    }
    if considering.contains(&name) {
        let mut stack: Vec<String> = considering.iter().map(|s| s.to_string()).collect();
        stack.sort();
        return Err(ValidationError::Cycle {
            name: name.to_string(),
            considering: stack,
        });
    }
    let Some(manifold) = manifolds.get(name) else {
        // Dangling input: not installed, cannot close a cycle.
        return Ok(());
    };
    considering.push(name);
    for input in &manifold.inputs {
        check_acyclic(input, manifolds, done, considering)?;
    }
    considering.pop();
    done.insert(name);
    Ok(())
}

/// Installs every manifold in the catalog, in name order, stopping at the
/// first error.
///
/// Atomic only from the caller's viewpoint: manifolds installed before a
/// failure stay installed.
pub async fn install_all(engine: &Engine, manifolds: Manifolds) -> Result<(), EngineError> {
    let mut entries: Vec<(String, Manifold)> = manifolds.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, manifold) in entries {
        engine.install(name, manifold).await?;
    }
    Ok(())
}

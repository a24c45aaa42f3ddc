//! # manifold
//!
//! **Manifold** is a dependency-aware worker engine.
//!
//! It hosts a dynamic set of named background workers whose startup is
//! gated on declared dependencies: install a catalog of manifolds, and
//! the engine starts each worker once the things it needs are running,
//! restarts dependents when their dependencies change, backs off (with
//! fuzz) on repeated failures, and escalates fatal errors into a single
//! well-defined terminal error.
//!
//! ## Features
//!
//! | Area             | Description                                                       | Key types / traits                       |
//! |------------------|-------------------------------------------------------------------|------------------------------------------|
//! | **Manifolds**    | Declare named workers, their inputs, outputs, and error filters.  | [`Manifold`], [`Manifolds`], [`start_fn`]|
//! | **Engine**       | Install, supervise, restart, and tear down workers.               | [`Engine`], [`EngineConfig`]             |
//! | **Resolution**   | Let a starting worker query its running dependencies by name.     | [`Context`]                              |
//! | **Workers**      | The running objects the engine drives (kill / wait / report).     | [`Worker`]                               |
//! | **Sentinels**    | Worker-to-engine signals with identity through wrapping.          | [`ErrMissing`], [`ErrBounce`], [`ErrUninstall`] |
//! | **Collaborators**| Injected clock, logger, and metrics.                              | [`Clock`], [`Logger`], [`Metrics`]       |
//! | **Introspection**| Consistent snapshots of engine state.                             | [`EngineReport`]                         |
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//! use manifold::{
//!     install_all, start_fn, DefaultMetrics, Engine, EngineConfig, Manifold, Manifolds,
//!     SystemClock, TracingLogger, Worker,
//! };
//!
//! struct Pinger {
//!     stop: CancellationToken,
//! }
//!
//! #[async_trait]
//! impl Worker for Pinger {
//!     fn kill(&self) {
//!         self.stop.cancel();
//!     }
//!     async fn wait(&self) -> anyhow::Result<()> {
//!         self.stop.cancelled().await;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::new(EngineConfig {
//!         is_fatal: Some(Arc::new(|_| false)),
//!         worst_error: Some(Arc::new(|err, _| err)),
//!         error_delay: Duration::from_secs(3),
//!         bounce_delay: Duration::from_millis(10),
//!         backoff_factor: 2.0,
//!         backoff_reset_time: Duration::from_secs(60),
//!         max_delay: Duration::from_secs(30),
//!         clock: Some(Arc::new(SystemClock)),
//!         metrics: Some(Arc::new(DefaultMetrics)),
//!         logger: Some(Arc::new(TracingLogger)),
//!         ..EngineConfig::default()
//!     })?;
//!
//!     let mut manifolds = Manifolds::new();
//!     manifolds.insert(
//!         "pinger".to_string(),
//!         Manifold::new(start_fn(|ctx| async move {
//!             ctx.get("config", None)?;
//!             Ok(Box::new(Pinger { stop: CancellationToken::new() }) as Box<dyn Worker>)
//!         }))
//!         .with_inputs(["config"]),
//!     );
//!     install_all(&engine, manifolds).await?;
//!
//!     engine.kill();
//!     engine.wait().await
//! }
//! ```

mod backoff;
mod clock;
mod config;
mod engine;
mod error;
mod logger;
mod manifold;
mod metrics;
pub mod testing;
mod worker;

// ---- Public re-exports ----

pub use clock::{Clock, SystemClock};
pub use config::{EngineConfig, IsFatalFn, WorstErrorFn};
pub use engine::{Context, Engine, EngineReport, ManifoldReport, ResourceAccess};
pub use error::{
    is_bounce, is_missing, is_uninstall, ConfigError, EngineError, ErrBounce, ErrMissing,
    ErrUninstall, ValidationError,
};
pub use logger::{Logger, TracingLogger};
pub use manifold::{install_all, start_fn, validate, FilterFn, Manifold, Manifolds, OutputFn, StartFn};
pub use metrics::{DefaultMetrics, Metrics};
pub use worker::{AsAny, Worker};

//! # Engine: dependency-aware worker supervision.
//!
//! The [`Engine`] hosts a dynamic set of named workers whose startup is
//! gated on declared dependencies. All state lives in a single dispatcher
//! task; everything else communicates with it by message passing.
//!
//! ## Architecture
//! ```text
//! Engine::install() ──► Msg::Install ─┐
//! Engine::report()  ──► Msg::Report ──┤
//! Engine::kill()    ──► kill token ───┤
//!                                     ▼
//!                              dispatcher loop ──► WorkerRecord map
//!                                     ▲                  │
//!                 Msg::StartResult ───┤         spawns   ▼
//!                 Msg::Exited ────────┤   ┌─ start companion ─┐
//!                                     └───┤ sleep(fuzzed delay)│
//!                                         │ factory(Context)   │
//!                                         └─ exit watcher ─────┘
//!                                              worker.wait()
//! ```
//!
//! ## Rules
//! - Every `WorkerRecord` mutation happens inside the dispatcher; the
//!   companions only report back through the message channel.
//! - At most one worker per name is alive at any moment (a start attempt
//!   owns the record until its result has been processed).
//! - A worker entering or leaving the started state bounces every worker
//!   whose most recent start attempt requested it; a starting worker is
//!   aborted when any *declared* input changes state.
//! - Once the engine is dying no new start attempts are scheduled; the
//!   loop drains until every record is idle, then reports the terminal
//!   error (the fatal errors folded by `worst_error`, rewritten by the
//!   engine-wide `filter`).

mod context;
mod record;
mod report;

pub use context::{Context, ResourceAccess};
pub use report::{EngineReport, ManifoldReport};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::backoff::{self, Backoff};
use crate::clock::Clock;
use crate::config::{EngineConfig, IsFatalFn, WorstErrorFn};
use crate::engine::context::Dependency;
use crate::engine::record::{RecordState, WorkerRecord};
use crate::error::{
    is_aborted, is_bounce, is_missing, is_uninstall, ConfigError, EngineError, ErrAborted,
};
use crate::logger::Logger;
use crate::manifold::{self, FilterFn, Manifold, Manifolds};
use crate::metrics::Metrics;
use crate::worker::Worker;

enum Msg {
    Install {
        name: String,
        manifold: Manifold,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    StartResult {
        name: String,
        start_id: u64,
        result: anyhow::Result<Box<dyn Worker>>,
    },
    Exited {
        name: String,
        start_id: u64,
        error: Option<anyhow::Error>,
    },
    Report {
        reply: oneshot::Sender<EngineReport>,
    },
}

/// # Dependency-aware worker engine.
///
/// Create one with [`Engine::new`] (must run inside a tokio runtime),
/// feed it manifolds with [`Engine::install`] or
/// [`install_all`](crate::install_all), and shut it down with
/// [`Engine::kill`] followed by [`Engine::wait`].
///
/// The engine is itself a [`Worker`], so it can be hosted by an outer
/// supervisor like any other worker.
#[derive(Debug)]
pub struct Engine {
    tx: mpsc::UnboundedSender<Msg>,
    kill_token: CancellationToken,
    done: watch::Receiver<bool>,
    result: Arc<Mutex<Option<anyhow::Error>>>,
}

impl Engine {
    /// Validates the configuration and spawns the dispatcher.
    ///
    /// Must be called from within a tokio runtime. Fails with
    /// `invalid config: <rule>` on the first broken configuration rule.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let EngineConfig {
            is_fatal,
            worst_error,
            filter,
            error_delay,
            bounce_delay,
            backoff_factor,
            backoff_reset_time,
            max_delay,
            clock,
            metrics,
            logger,
        } = config;
        // validate() has checked these; the fallback is never taken.
        let (Some(is_fatal), Some(worst_error), Some(clock), Some(metrics), Some(logger)) =
            (is_fatal, worst_error, clock, metrics, logger)
        else {
            return Err(ConfigError::IsFatalNotSpecified.into());
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);
        let kill_token = CancellationToken::new();
        let result = Arc::new(Mutex::new(None));

        let dispatcher = Dispatcher {
            rx,
            tx: tx.clone(),
            kill_token: kill_token.clone(),
            done_tx,
            result: Arc::clone(&result),
            is_fatal,
            worst_error,
            filter,
            backoff: Backoff {
                error_delay,
                bounce_delay,
                factor: backoff_factor,
                reset_time: backoff_reset_time,
                max_delay,
            },
            clock,
            metrics,
            logger,
            records: HashMap::new(),
            dying: false,
            terminal: None,
            next_start_id: 0,
        };
        tokio::spawn(dispatcher.run());

        Ok(Self {
            tx,
            kill_token,
            done: done_rx,
            result,
        })
    }

    /// Installs a manifold under `name` and immediately schedules its
    /// first start attempt.
    ///
    /// Fails if the engine is shutting down, the name is taken, or the
    /// manifold would close a dependency cycle.
    pub async fn install(
        &self,
        name: impl Into<String>,
        manifold: Manifold,
    ) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Msg::Install {
                name: name.into(),
                manifold,
                reply,
            })
            .map_err(|_| EngineError::ShuttingDown)?;
        rx.await.map_err(|_| EngineError::ShuttingDown)?
    }

    /// Requests engine shutdown. Idempotent, never blocks.
    pub fn kill(&self) {
        self.kill_token.cancel();
    }

    /// Waits until every worker has stopped and returns the engine's
    /// terminal error.
    ///
    /// The first caller receives the real terminal error; later callers
    /// get `Ok(())`.
    pub async fn wait(&self) -> anyhow::Result<()> {
        let mut done = self.done.clone();
        let _ = done.wait_for(|&done| done).await;
        match self
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Produces a consistent snapshot of engine state for diagnostics.
    ///
    /// After the engine has fully stopped this returns a synthetic
    /// `"stopped"` report with no per-manifold detail.
    pub async fn report(&self) -> EngineReport {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Msg::Report { reply }).is_err() {
            return EngineReport::stopped();
        }
        rx.await.unwrap_or_else(|_| EngineReport::stopped())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Orphaned workers would outlive their owner otherwise.
        self.kill_token.cancel();
    }
}

#[async_trait]
impl Worker for Engine {
    fn kill(&self) {
        Engine::kill(self);
    }

    async fn wait(&self) -> anyhow::Result<()> {
        Engine::wait(self).await
    }
}

/// The engine's single serializer: owns every record, processes one event
/// at a time.
struct Dispatcher {
    rx: mpsc::UnboundedReceiver<Msg>,
    tx: mpsc::UnboundedSender<Msg>,
    kill_token: CancellationToken,
    done_tx: watch::Sender<bool>,
    result: Arc<Mutex<Option<anyhow::Error>>>,

    is_fatal: IsFatalFn,
    worst_error: WorstErrorFn,
    filter: Option<FilterFn>,
    backoff: Backoff,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn Metrics>,
    logger: Arc<dyn Logger>,

    records: HashMap<String, WorkerRecord>,
    dying: bool,
    terminal: Option<anyhow::Error>,
    next_start_id: u64,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.kill_token.cancelled(), if !self.dying => {
                    self.begin_shutdown(None);
                }
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    // All senders gone; cannot happen while we hold tx,
                    // but shut down defensively rather than spin.
                    None => self.begin_shutdown(None),
                },
            }
            if self.dying && self.records.values().all(WorkerRecord::is_idle) {
                break;
            }
        }
        self.finish();
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Install {
                name,
                manifold,
                reply,
            } => {
                let _ = reply.send(self.install(name, manifold));
            }
            Msg::StartResult {
                name,
                start_id,
                result,
            } => self.start_result(name, start_id, result),
            Msg::Exited {
                name,
                start_id,
                error,
            } => self.worker_exited(name, start_id, error),
            Msg::Report { reply } => {
                let _ = reply.send(self.make_report());
            }
        }
    }

    fn install(&mut self, name: String, manifold: Manifold) -> Result<(), EngineError> {
        if self.dying {
            return Err(EngineError::ShuttingDown);
        }
        if self.records.contains_key(&name) {
            return Err(EngineError::AlreadyInstalled { name });
        }
        let mut catalog: Manifolds = self
            .records
            .iter()
            .map(|(name, record)| (name.clone(), record.manifold.clone()))
            .collect();
        catalog.insert(name.clone(), manifold.clone());
        manifold::validate(&catalog).map_err(|source| EngineError::Install {
            name: name.clone(),
            source,
        })?;

        self.logger
            .debug(format_args!("installing {name:?} manifold"));
        self.records
            .insert(name.clone(), WorkerRecord::new(manifold));
        self.request_start(&name, Duration::ZERO);
        Ok(())
    }

    /// Schedules a start attempt for an idle record after a fuzzed delay.
    ///
    /// The attempt owns the record (state `Starting`) for its whole
    /// lifetime, delay phase included; cancelling its abort token is the
    /// only way to interrupt it.
    fn request_start(&mut self, name: &str, base_delay: Duration) {
        if self.dying {
            return;
        }
        let (inputs, start) = match self.records.get(name) {
            Some(record) if record.is_idle() => (
                record.manifold.inputs.clone(),
                Arc::clone(&record.manifold.start),
            ),
            _ => return,
        };

        // Snapshot the started declared inputs for the context.
        let mut snapshot = HashMap::new();
        for input in &inputs {
            if let Some(dependency) = self.records.get(input) {
                if let RecordState::Started { worker, .. } = &dependency.state {
                    snapshot.insert(
                        input.clone(),
                        Dependency {
                            worker: Arc::clone(worker),
                            output: dependency.manifold.output.clone(),
                        },
                    );
                }
            }
        }

        let start_id = self.next_start_id;
        self.next_start_id += 1;
        let abort = CancellationToken::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let Some(record) = self.records.get_mut(name) else {
            return;
        };
        record.state = RecordState::Starting {
            start_id,
            abort: abort.clone(),
            log: Arc::clone(&log),
        };

        let delay = backoff::fuzz(base_delay);
        self.metrics.record_start(name);
        self.logger.trace(format_args!(
            "starting {name:?} manifold worker (after {delay:?})"
        ));

        let ctx = Context::new(
            name.to_string(),
            inputs,
            snapshot,
            log,
            abort.clone(),
            Arc::clone(&self.logger),
        );
        let tx = self.tx.clone();
        let clock = Arc::clone(&self.clock);
        let name = name.to_string();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = clock.sleep(delay) => {}
                    _ = abort.cancelled() => {
                        let _ = tx.send(Msg::StartResult {
                            name,
                            start_id,
                            result: Err(anyhow::Error::new(ErrAborted)),
                        });
                        return;
                    }
                }
            }
            if abort.is_cancelled() {
                let _ = tx.send(Msg::StartResult {
                    name,
                    start_id,
                    result: Err(anyhow::Error::new(ErrAborted)),
                });
                return;
            }
            let result = start(ctx).await;
            let _ = tx.send(Msg::StartResult {
                name,
                start_id,
                result,
            });
        });
    }

    fn start_result(
        &mut self,
        name: String,
        start_id: u64,
        result: anyhow::Result<Box<dyn Worker>>,
    ) {
        let (stale, log) = match self.records.get(&name) {
            Some(record) => match &record.state {
                RecordState::Starting {
                    start_id: current,
                    abort,
                    log,
                } if *current == start_id => (abort.is_cancelled(), Context::take_log(log)),
                _ => {
                    if let Ok(worker) = result {
                        self.discard_worker(worker);
                    }
                    return;
                }
            },
            None => {
                if let Ok(worker) = result {
                    self.discard_worker(worker);
                }
                return;
            }
        };
        if let Some(record) = self.records.get_mut(&name) {
            record.last_log = log;
        }
        match result {
            Ok(worker) => self.start_succeeded(name, start_id, Arc::from(worker), stale),
            Err(err) => self.start_failed(name, err),
        }
    }

    fn start_succeeded(&mut self, name: String, start_id: u64, worker: Arc<dyn Worker>, stale: bool) {
        if self.dying || stale {
            // Built against a stale dependency snapshot (or an engine on
            // its way out); stop it and, if still wanted, try again.
            self.logger.trace(format_args!(
                "{name:?} manifold worker no longer required, stopping"
            ));
            worker.kill();
            if let Some(record) = self.records.get_mut(&name) {
                record.state = RecordState::Stopping {
                    start_id,
                    worker: Arc::clone(&worker),
                    bounce: !self.dying,
                };
            }
            self.watch_exit(name, start_id, worker);
            return;
        }

        if let Some(record) = self.records.get_mut(&name) {
            record.state = RecordState::Started {
                start_id,
                worker: Arc::clone(&worker),
            };
            record.started_time = Some(self.clock.now());
            record.last_error = None;
        }
        self.logger
            .debug(format_args!("started {name:?} manifold worker"));
        self.watch_exit(name.clone(), start_id, worker);
        self.dependency_changed(&name);
    }

    fn start_failed(&mut self, name: String, raw: anyhow::Error) {
        let filter = self
            .records
            .get(&name)
            .and_then(|record| record.manifold.filter.clone());
        let err = match filter {
            Some(filter) => filter(raw),
            None => raw,
        };
        if let Some(record) = self.records.get_mut(&name) {
            record.state = RecordState::Idle;
            record.last_error = Some(format!("{err:#}"));
        }

        if is_aborted(&err) {
            self.logger.trace(format_args!(
                "{name:?} manifold worker start aborted, rescheduling"
            ));
            self.request_start(&name, self.backoff.bounce_delay);
        } else if is_missing(&err) {
            self.logger.trace(format_args!(
                "{name:?} manifold worker cannot start yet: {err:#}"
            ));
            // Idle until a dependency changes state.
        } else if is_bounce(&err) {
            self.logger
                .debug(format_args!("{name:?} manifold worker bounced at startup"));
            self.request_start(&name, self.backoff.bounce_delay);
        } else if is_uninstall(&err) {
            self.logger
                .debug(format_args!("removing {name:?} manifold on request"));
            self.records.remove(&name);
        } else if (self.is_fatal)(&err) {
            self.logger.error(format_args!(
                "fatal error starting {name:?} manifold worker: {err:#}"
            ));
            self.begin_shutdown(Some(err));
        } else {
            let attempts = match self.records.get_mut(&name) {
                Some(record) => {
                    record.start_attempts += 1;
                    record.start_attempts
                }
                None => return,
            };
            self.logger.error(format_args!(
                "failed to start {name:?} manifold worker: {err:#}"
            ));
            self.request_start(&name, self.backoff.retry_delay(attempts));
        }
    }

    fn worker_exited(&mut self, name: String, start_id: u64, error: Option<anyhow::Error>) {
        let (bounce, started_time) = {
            let Some(record) = self.records.get_mut(&name) else {
                return;
            };
            let bounce = match &record.state {
                RecordState::Started {
                    start_id: current, ..
                } if *current == start_id => false,
                RecordState::Stopping {
                    start_id: current,
                    bounce,
                    ..
                } if *current == start_id => *bounce,
                _ => return,
            };
            record.state = RecordState::Idle;
            (bounce, record.started_time.take())
        };

        match error {
            None => {
                if let Some(record) = self.records.get_mut(&name) {
                    record.last_error = None;
                }
                if bounce {
                    self.logger.trace(format_args!(
                        "{name:?} manifold worker stopped, restarting"
                    ));
                    self.request_start(&name, self.backoff.bounce_delay);
                } else {
                    self.logger.debug(format_args!(
                        "{name:?} manifold worker completed successfully"
                    ));
                }
            }
            Some(raw) => {
                let filter = self
                    .records
                    .get(&name)
                    .and_then(|record| record.manifold.filter.clone());
                let err = match filter {
                    Some(filter) => filter(raw),
                    None => raw,
                };
                if let Some(record) = self.records.get_mut(&name) {
                    record.last_error = Some(format!("{err:#}"));
                }

                if is_missing(&err) {
                    self.logger.trace(format_args!(
                        "{name:?} manifold worker stopped: dependencies not ready"
                    ));
                    self.request_start(&name, self.backoff.bounce_delay);
                } else if is_bounce(&err) {
                    self.logger
                        .debug(format_args!("{name:?} manifold worker requested bounce"));
                    self.request_start(&name, self.backoff.bounce_delay);
                } else if is_uninstall(&err) {
                    self.logger
                        .debug(format_args!("removing {name:?} manifold (uninstalled)"));
                    self.records.remove(&name);
                } else if (self.is_fatal)(&err) {
                    self.logger.error(format_args!(
                        "fatal error from {name:?} manifold worker: {err:#}"
                    ));
                    self.begin_shutdown(Some(err));
                } else {
                    let attempts = match self.records.get_mut(&name) {
                        Some(record) => {
                            // A long enough run earns a fresh backoff curve.
                            if let Some(started) = started_time {
                                let ran = self.clock.now().saturating_duration_since(started);
                                if ran >= self.backoff.reset_time {
                                    record.start_attempts = 0;
                                }
                            }
                            record.start_attempts += 1;
                            record.start_attempts
                        }
                        None => return,
                    };
                    self.logger.error(format_args!(
                        "{name:?} manifold worker returned unexpected error: {err:#}"
                    ));
                    self.request_start(&name, self.backoff.retry_delay(attempts));
                }
            }
        }

        // The worker left the started state; its dependents are stale.
        self.dependency_changed(&name);
    }

    /// Propagates a state change of `changed` (into or out of started) to
    /// every other record.
    fn dependency_changed(&mut self, changed: &str) {
        enum Action {
            Stop(Arc<dyn Worker>, u64),
            Reschedule,
        }

        let names: Vec<String> = self
            .records
            .keys()
            .filter(|name| name.as_str() != changed)
            .cloned()
            .collect();
        for other in names {
            let action = match self.records.get(&other) {
                Some(record) => match &record.state {
                    RecordState::Started { worker, start_id } if record.touched(changed) => {
                        Action::Stop(Arc::clone(worker), *start_id)
                    }
                    RecordState::Starting { abort, .. }
                        if record.manifold.inputs.iter().any(|i| i == changed) =>
                    {
                        // The in-flight attempt is working from a stale
                        // snapshot; abort it and let it reschedule.
                        self.logger.trace(format_args!(
                            "aborting {other:?} manifold worker start: dependency {changed:?} changed"
                        ));
                        abort.cancel();
                        continue;
                    }
                    RecordState::Idle if record.touched(changed) => Action::Reschedule,
                    _ => continue,
                },
                None => continue,
            };
            match action {
                Action::Stop(worker, start_id) => {
                    self.logger.debug(format_args!(
                        "stopping {other:?} manifold worker: dependency {changed:?} changed"
                    ));
                    worker.kill();
                    if let Some(record) = self.records.get_mut(&other) {
                        record.state = RecordState::Stopping {
                            start_id,
                            worker,
                            bounce: true,
                        };
                    }
                }
                Action::Reschedule => {
                    self.logger.trace(format_args!(
                        "dependency {changed:?} changed, rescheduling {other:?} manifold worker"
                    ));
                    self.request_start(&other, self.backoff.bounce_delay);
                }
            }
        }
    }

    fn begin_shutdown(&mut self, fatal: Option<anyhow::Error>) {
        if let Some(err) = fatal {
            self.record_fatal(err);
        }
        if self.dying {
            return;
        }
        self.dying = true;
        self.logger.debug(format_args!("engine is dying"));
        for (name, record) in self.records.iter_mut() {
            let replacement = match &record.state {
                RecordState::Started { start_id, worker } => {
                    self.logger
                        .trace(format_args!("stopping {name:?} manifold worker"));
                    worker.kill();
                    Some(RecordState::Stopping {
                        start_id: *start_id,
                        worker: Arc::clone(worker),
                        bounce: false,
                    })
                }
                RecordState::Starting { abort, .. } => {
                    abort.cancel();
                    None
                }
                _ => None,
            };
            if let Some(state) = replacement {
                record.state = state;
            }
        }
    }

    fn record_fatal(&mut self, err: anyhow::Error) {
        // The aggregator runs for every fatal, the first one included.
        self.terminal = Some((self.worst_error)(err, self.terminal.take()));
    }

    fn watch_exit(&self, name: String, start_id: u64, worker: Arc<dyn Worker>) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let error = worker.wait().await.err();
            let _ = tx.send(Msg::Exited {
                name,
                start_id,
                error,
            });
        });
    }

    fn discard_worker(&self, worker: Box<dyn Worker>) {
        let worker: Arc<dyn Worker> = Arc::from(worker);
        worker.kill();
        tokio::spawn(async move {
            let _ = worker.wait().await;
        });
    }

    fn make_report(&self) -> EngineReport {
        let mut manifolds = BTreeMap::new();
        for (name, record) in &self.records {
            let report = match &record.state {
                RecordState::Started { worker, .. } | RecordState::Stopping { worker, .. } => {
                    worker.report()
                }
                _ => None,
            };
            manifolds.insert(
                name.clone(),
                ManifoldReport {
                    state: record.state_name().to_string(),
                    error: record.last_error.clone(),
                    inputs: record.manifold.inputs.clone(),
                    start_attempts: record.start_attempts,
                    resource_log: record.last_log.clone(),
                    report,
                },
            );
        }
        EngineReport {
            state: if self.dying { "dying" } else { "running" }.to_string(),
            terminal_error: self.terminal.as_ref().map(|err| format!("{err:#}")),
            manifolds,
        }
    }

    fn finish(self) {
        let mut terminal = self.terminal;
        if let Some(filter) = &self.filter {
            terminal = terminal.map(|err| filter(err));
        }
        match &terminal {
            Some(err) => self
                .logger
                .info(format_args!("engine stopped with error: {err:#}")),
            None => self.logger.debug(format_args!("engine stopped cleanly")),
        }
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = terminal;
        let _ = self.done_tx.send(true);
    }
}

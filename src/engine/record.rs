//! # Per-manifold worker record.
//!
//! One [`WorkerRecord`] per installed manifold, owned exclusively by the
//! dispatcher. The record tracks where the worker is in its lifecycle,
//! how many consecutive start attempts have failed, when the current
//! worker began running, and which dependency names the most recent start
//! attempt touched (its restart-sensitivity set).
//!
//! ## State machine
//! ```text
//! Idle ──schedule──► Starting ──factory ok──► Started ──exit──► Idle
//!   ▲                   │  └──factory err──► Idle        ▲
//!   │                   └──aborted────────► Idle         │
//!   └──────────────── Stopping ◄──kill (dependency change or dying)
//! ```
//! A scheduled-but-delayed start is the delay phase of `Starting`; a
//! started worker therefore never has a pending timer.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::engine::context::ResourceAccess;
use crate::manifold::Manifold;
use crate::worker::Worker;

/// Lifecycle state of one manifold's worker.
pub(crate) enum RecordState {
    /// No worker and no attempt in flight.
    Idle,
    /// A start attempt (delay phase or factory) is in flight.
    Starting {
        start_id: u64,
        abort: CancellationToken,
        log: Arc<Mutex<Vec<ResourceAccess>>>,
    },
    /// The worker is running.
    Started {
        start_id: u64,
        worker: Arc<dyn Worker>,
    },
    /// The engine asked the worker to stop and is waiting for its exit.
    Stopping {
        start_id: u64,
        worker: Arc<dyn Worker>,
        /// Restart after the exit (dependency change) rather than rest.
        bounce: bool,
    },
}

/// Mutable record for one installed manifold.
pub(crate) struct WorkerRecord {
    pub(crate) manifold: Manifold,
    pub(crate) state: RecordState,
    /// Consecutive failed attempts since the last sufficient success.
    pub(crate) start_attempts: u64,
    /// When the current (or last) worker began running.
    pub(crate) started_time: Option<Instant>,
    /// Most recent error, rendered for reporting.
    pub(crate) last_error: Option<String>,
    /// Resource accesses of the most recent completed start attempt.
    pub(crate) last_log: Vec<ResourceAccess>,
}

impl WorkerRecord {
    pub(crate) fn new(manifold: Manifold) -> Self {
        Self {
            manifold,
            state: RecordState::Idle,
            start_attempts: 0,
            started_time: None,
            last_error: None,
            last_log: Vec::new(),
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        matches!(self.state, RecordState::Idle)
    }

    /// Whether the most recent start attempt requested `name`.
    pub(crate) fn touched(&self, name: &str) -> bool {
        self.last_log.iter().any(|access| access.name == name)
    }

    pub(crate) fn state_name(&self) -> &'static str {
        match self.state {
            RecordState::Idle => "idle",
            RecordState::Starting { .. } => "starting",
            RecordState::Started { .. } => "started",
            RecordState::Stopping { .. } => "stopping",
        }
    }
}

//! # Engine introspection snapshot.
//!
//! [`EngineReport`] is a read-only projection of engine state, produced
//! by the dispatcher itself so it is always consistent with the engine's
//! invariants. The types serialize to JSON for easy embedding in status
//! endpoints and debug dumps.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::engine::context::ResourceAccess;

/// Snapshot of the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineReport {
    /// `"running"`, `"dying"`, or `"stopped"`.
    pub state: String,
    /// Accumulated terminal error, if any fatal error has been observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_error: Option<String>,
    /// Per-manifold detail, keyed by name.
    pub manifolds: BTreeMap<String, ManifoldReport>,
}

impl EngineReport {
    /// Synthetic report for an engine whose dispatcher has already
    /// exited; no per-manifold detail survives it.
    pub(crate) fn stopped() -> Self {
        Self {
            state: "stopped".to_string(),
            terminal_error: None,
            manifolds: BTreeMap::new(),
        }
    }
}

/// Snapshot of one installed manifold.
#[derive(Debug, Clone, Serialize)]
pub struct ManifoldReport {
    /// `"idle"`, `"starting"`, `"started"`, or `"stopping"`.
    pub state: String,
    /// Most recent error from the worker or its factory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Declared inputs.
    pub inputs: Vec<String>,
    /// Consecutive failed start attempts.
    pub start_attempts: u64,
    /// Dependency accesses of the most recent start attempt.
    pub resource_log: Vec<ResourceAccess>,
    /// The running worker's self-description, if it offers one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<serde_json::Value>,
}

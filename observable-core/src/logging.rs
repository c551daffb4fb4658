//! Process-wide logging hook.
//!
//! A logger is purely observational: it is told about every cell write,
//! derived recompute or failure, autorun run and transaction commit, but it
//! can never influence evaluation order or results. Hooks are called with no
//! engine state borrowed. No logger is installed by default.
//!
//! The engine itself also emits `tracing` events; [`TracingLogger`] forwards
//! hook events to `tracing` for hosts that only want one sink.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::ObservableError;
use crate::graph::NodeId;

/// Identity of the node an event is about.
#[derive(Debug, Clone, Copy)]
pub struct NodeInfo<'a> {
    /// Runtime-unique id.
    pub id: NodeId,
    /// Diagnostic name given at construction.
    pub name: &'a str,
}

/// Summary handed to [`ObservableLogger::handle_commit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Cells whose value actually changed during the transaction.
    pub changed_cells: usize,
    /// Autoruns whose effect ran during the commit.
    pub autoruns_run: usize,
    /// Follow-up rounds caused by deferred writes.
    pub rounds: usize,
}

/// Observer of engine activity.
pub trait ObservableLogger: Send + Sync {
    /// A cell was written. `changed` is false when equality suppressed it.
    fn handle_cell_write(&self, _node: NodeInfo<'_>, _changed: bool) {}

    /// A derived value was recomputed.
    fn handle_derived_recomputed(&self, _node: NodeInfo<'_>, _changed: bool) {}

    /// A derived's read function failed. The last good value is kept.
    fn handle_derived_failed(&self, _node: NodeInfo<'_>, _error: &ObservableError) {}

    /// An autorun effect ran.
    fn handle_autorun_run(&self, _node: NodeInfo<'_>) {}

    /// The outermost transaction finished committing.
    fn handle_commit(&self, _summary: &CommitSummary) {}
}

static LOGGER: RwLock<Option<Arc<dyn ObservableLogger>>> = parking_lot::const_rwlock(None);

/// Install the process-wide logger, returning the previous one.
pub fn set_logger(logger: Arc<dyn ObservableLogger>) -> Option<Arc<dyn ObservableLogger>> {
    LOGGER.write().replace(logger)
}

/// Remove the process-wide logger, returning it.
pub fn clear_logger() -> Option<Arc<dyn ObservableLogger>> {
    LOGGER.write().take()
}

/// Run `f` against the installed logger, if any.
pub(crate) fn with_logger(f: impl FnOnce(&dyn ObservableLogger)) {
    // Clone out of the lock so a logger may swap itself out.
    let logger = LOGGER.read().clone();
    if let Some(logger) = logger {
        f(logger.as_ref());
    }
}

/// Logger that forwards every event to `tracing` under the `observable` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl ObservableLogger for TracingLogger {
    fn handle_cell_write(&self, node: NodeInfo<'_>, changed: bool) {
        tracing::debug!(target: "observable", id = %node.id, name = node.name, changed, "cell write");
    }

    fn handle_derived_recomputed(&self, node: NodeInfo<'_>, changed: bool) {
        tracing::debug!(target: "observable", id = %node.id, name = node.name, changed, "derived recomputed");
    }

    fn handle_derived_failed(&self, node: NodeInfo<'_>, error: &ObservableError) {
        tracing::warn!(target: "observable", id = %node.id, name = node.name, error = %error, "derived failed");
    }

    fn handle_autorun_run(&self, node: NodeInfo<'_>) {
        tracing::debug!(target: "observable", id = %node.id, name = node.name, "autorun run");
    }

    fn handle_commit(&self, summary: &CommitSummary) {
        tracing::debug!(
            target: "observable",
            changed_cells = summary.changed_cells,
            autoruns_run = summary.autoruns_run,
            rounds = summary.rounds,
            "transaction committed"
        );
    }
}

//! Transactions
//!
//! A transaction batches writes so that dependents observe one consistent
//! update. Writes land immediately and mark the graph as they go; the
//! outermost transaction end settles every autorun reached, each exactly once.
//!
//! # Commit
//!
//! 1. Drain the pending autorun frontier, settling each one (which pulls its
//!    derived dependencies first).
//! 2. Apply writes that evaluations issued while running, as a new round.
//! 3. Repeat until no deferred writes remain, or fail with
//!    [`ObservableError::UpdateLoop`] after too many rounds.
//!
//! A failing autorun does not stop the commit: the error is logged, the rest
//! of the frontier is processed, and the first error is returned. A panic
//! unwinding out of a transaction or a commit leaves the runtime usable; the
//! interrupted commit's remaining work is dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use indexmap::IndexSet;

use super::runtime::Runtime;
use crate::error::{ObservableError, Result};
use crate::graph::{AnyValue, Frontier, NodeId};
use crate::logging::{self, CommitSummary};

/// A write issued while an evaluation was running.
pub(crate) struct DeferredWrite {
    pub(crate) target: NodeId,
    pub(crate) value: AnyValue,
}

/// Bookkeeping of the active batch.
#[derive(Default)]
pub(crate) struct ChangeTracker {
    /// Open `transaction` calls.
    depth: usize,
    /// Cells whose value changed in this batch.
    changed: IndexSet<NodeId>,
    /// Autoruns reached by the mark phase, in the order they were reached.
    /// Entries no longer in `scheduled` were unscheduled and are skipped.
    pending: VecDeque<NodeId>,
    scheduled: HashSet<NodeId>,
    deferred: VecDeque<DeferredWrite>,
    autoruns_run: usize,
    /// Deriveds whose read function failed since the last cell change.
    failed: HashMap<NodeId, ObservableError>,
}

impl ChangeTracker {
    pub(crate) fn begin(&mut self) {
        self.depth += 1;
    }

    /// Close one level. Returns true when the outermost level closed.
    pub(crate) fn end(&mut self) -> bool {
        self.depth = self.depth.saturating_sub(1);
        self.depth == 0
    }

    pub(crate) fn is_active(&self) -> bool {
        self.depth > 0
    }

    /// A cell changed value. Remembered failures may succeed now.
    pub(crate) fn record_change(&mut self, cell: NodeId) {
        self.changed.insert(cell);
        self.failed.clear();
    }

    pub(crate) fn schedule(&mut self, frontier: Frontier) {
        for id in frontier {
            if self.scheduled.insert(id) {
                self.pending.push_back(id);
            }
        }
    }

    /// Drop a disposed node's pending notification.
    pub(crate) fn unschedule(&mut self, id: NodeId) {
        self.scheduled.remove(&id);
    }

    pub(crate) fn next_pending(&mut self) -> Option<NodeId> {
        while let Some(id) = self.pending.pop_front() {
            if self.scheduled.remove(&id) {
                return Some(id);
            }
        }
        None
    }

    pub(crate) fn record_failure(&mut self, id: NodeId, err: ObservableError) {
        self.failed.insert(id, err);
    }

    pub(crate) fn failure(&self, id: NodeId) -> Option<ObservableError> {
        self.failed.get(&id).cloned()
    }

    pub(crate) fn clear_failures(&mut self) {
        self.failed.clear();
    }

    pub(crate) fn defer(&mut self, write: DeferredWrite) {
        self.deferred.push_back(write);
    }

    pub(crate) fn take_deferred(&mut self) -> VecDeque<DeferredWrite> {
        std::mem::take(&mut self.deferred)
    }

    pub(crate) fn note_autorun_run(&mut self) {
        self.autoruns_run += 1;
    }

    /// Nothing is open but work was left behind by an evaluation.
    pub(crate) fn has_orphaned_work(&self) -> bool {
        self.depth == 0 && (!self.scheduled.is_empty() || !self.deferred.is_empty())
    }

    fn begin_commit(&mut self) {
        self.depth = 1;
    }

    fn abandon(&mut self) {
        self.pending.clear();
        self.scheduled.clear();
        self.deferred.clear();
    }

    fn finish_commit(&mut self, rounds: usize) -> CommitSummary {
        let summary = CommitSummary {
            changed_cells: self.changed.len(),
            autoruns_run: self.autoruns_run,
            rounds,
        };
        self.depth = 0;
        self.changed.clear();
        self.autoruns_run = 0;
        self.failed.clear();
        summary
    }
}

impl fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("depth", &self.depth)
            .field("changed", &self.changed)
            .field("scheduled", &self.scheduled.len())
            .field("deferred", &self.deferred.len())
            .field("failed", &self.failed.len())
            .finish()
    }
}

/// Token for an open transaction. Pass it to `set` to write as part of the
/// batch.
pub struct Transaction<'a> {
    runtime: &'a Runtime,
}

impl<'a> Transaction<'a> {
    /// The runtime this transaction batches writes for.
    pub fn runtime(&self) -> &'a Runtime {
        self.runtime
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction").finish_non_exhaustive()
    }
}

/// Closes one transaction level even if the body panics.
struct OpenLevel<'a> {
    runtime: &'a Runtime,
    open: bool,
}

impl OpenLevel<'_> {
    fn enter(runtime: &Runtime) -> OpenLevel<'_> {
        runtime.tracker().borrow_mut().begin();
        OpenLevel { runtime, open: true }
    }

    /// Returns true when the outermost level closed.
    fn close(mut self) -> bool {
        self.open = false;
        self.runtime.tracker().borrow_mut().end()
    }
}

impl Drop for OpenLevel<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if let Ok(mut tracker) = self.runtime.tracker().try_borrow_mut() {
            tracker.end();
        }
    }
}

/// Resets the tracker if a commit unwinds before finishing.
struct CommitGuard<'a> {
    runtime: &'a Runtime,
    finished: bool,
}

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Ok(mut tracker) = self.runtime.tracker().try_borrow_mut() {
            tracing::error!("commit interrupted by a panic, dropping pending updates");
            tracker.abandon();
            tracker.finish_commit(0);
        }
    }
}

impl Runtime {
    /// Run `f` with every write batched into one commit.
    ///
    /// Nested calls join the outermost transaction; only its end commits. If
    /// `f` fails, the writes it made still commit and its error is returned.
    pub fn transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R>,
    {
        let level = OpenLevel::enter(self);
        let result = f(&Transaction { runtime: self });
        let outermost = level.close();

        // Inside an evaluation the commit waits until the evaluation returns.
        if !outermost || self.is_evaluating() {
            return result;
        }

        let committed = self.commit();
        match (result, committed) {
            (Err(err), _) => Err(err),
            (Ok(_), Err(err)) => Err(err),
            (Ok(value), Ok(())) => Ok(value),
        }
    }

    fn commit(&self) -> Result<()> {
        self.tracker().borrow_mut().begin_commit();
        let mut guard = CommitGuard {
            runtime: self,
            finished: false,
        };
        let max_rounds = self.config().max_update_rounds;
        let mut first_error: Option<ObservableError> = None;
        let mut rounds = 0;

        loop {
            loop {
                let next = self.tracker().borrow_mut().next_pending();
                let Some(id) = next else {
                    break;
                };
                if !self.contains(id) {
                    continue;
                }
                if let Err(err) = self.refresh(id) {
                    tracing::error!(node = %id, error = %err, "autorun failed during commit");
                    first_error.get_or_insert(err);
                }
            }

            let writes = self.tracker().borrow_mut().take_deferred();
            if writes.is_empty() {
                break;
            }
            rounds += 1;
            if rounds > max_rounds {
                tracing::error!(rounds = max_rounds, "transaction did not settle, dropping pending updates");
                self.tracker().borrow_mut().abandon();
                first_error.get_or_insert(ObservableError::UpdateLoop { rounds: max_rounds });
                break;
            }
            for write in writes {
                if let Err(err) = self.apply_write(write.target, write.value) {
                    tracing::error!(node = %write.target, error = %err, "deferred write failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        let summary = self.tracker().borrow_mut().finish_commit(rounds);
        guard.finished = true;
        tracing::debug!(
            changed_cells = summary.changed_cells,
            autoruns_run = summary.autoruns_run,
            rounds = summary.rounds,
            "transaction committed"
        );
        logging::with_logger(|logger| logger.handle_commit(&summary));

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

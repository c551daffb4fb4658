//! Reactive Runtime
//!
//! The runtime is the explicit context that owns the dependency arena, the
//! active batch and the stack of running evaluations. Every read and write
//! goes through it (directly, through a [`Transaction`](super::Transaction)
//! or through a [`Reader`]), so there is no ambient global state.
//!
//! # How It Works
//!
//! 1. Writing a cell stores the value and runs the mark phase: direct
//!    observers become `Stale`, transitive ones `MaybeStale`, and reached
//!    autoruns join the pending frontier.
//!
//! 2. Reading a derived settles it first. A `MaybeStale` derived settles its
//!    derived dependencies in order and only recomputes if one of them
//!    reported a real change. A recompute whose result equals the cached
//!    value stops propagation right there.
//!
//! 3. At the end of the outermost transaction the frontier is settled, which
//!    runs each reached autorun at most once, after everything it reads.
//!
//! # Threading
//!
//! The runtime is single threaded (`Rc` + `RefCell`). Borrows of the arena
//! are never held across calls into user code.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::autorun::ChangeContext;
use super::reader::{Reader, ScopeId, ScopeStack};
use super::transaction::{ChangeTracker, DeferredWrite};
use crate::config::RuntimeConfig;
use crate::error::{ObservableError, Result};
use crate::graph::{values_equal, AnyValue, Frontier, Node, NodeBody, NodeId, NodeKind, NodeState, UpdateScheduler};
use crate::logging::{self, NodeInfo};

struct Inner {
    config: RuntimeConfig,
    graph: RefCell<UpdateScheduler>,
    tracker: RefCell<ChangeTracker>,
    scopes: RefCell<ScopeStack>,
}

/// Handle to an observable graph.
///
/// Cloning is cheap and yields another handle to the same graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<Inner>,
}

/// Non-owning runtime handle, used by disposers stored inside the graph.
#[derive(Clone)]
pub(crate) struct WeakRuntime(Weak<Inner>);

impl WeakRuntime {
    pub(crate) fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }
}

/// Closes an evaluation scope even if the evaluated closure panics.
struct EvaluationGuard<'a> {
    runtime: &'a Runtime,
    id: NodeId,
    scope: ScopeId,
    finished: bool,
}

impl EvaluationGuard<'_> {
    fn finish(mut self) -> IndexSet<NodeId> {
        self.finished = true;
        self.runtime.inner.scopes.borrow_mut().exit(self.scope)
    }
}

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Ok(mut scopes) = self.runtime.inner.scopes.try_borrow_mut() {
            scopes.exit(self.scope);
        }
        if let Ok(mut graph) = self.runtime.inner.graph.try_borrow_mut() {
            if let Ok(node) = graph.node_mut(self.id) {
                node.set_computing(false);
                node.mark_stale();
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Create an empty runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create an empty runtime.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(Inner {
                config,
                graph: RefCell::new(UpdateScheduler::new()),
                tracker: RefCell::new(ChangeTracker::default()),
                scopes: RefCell::new(ScopeStack::default()),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.inner.graph.borrow().node_count()
    }

    /// Number of nodes that currently depend on `id`.
    pub fn observer_count(&self, id: NodeId) -> usize {
        self.inner
            .graph
            .borrow()
            .node(id)
            .map_or(0, |node| node.observers().len())
    }

    /// Number of nodes `id` read during its last evaluation.
    pub fn dependency_count(&self, id: NodeId) -> usize {
        self.inner
            .graph
            .borrow()
            .node(id)
            .map_or(0, |node| node.dependencies().len())
    }

    /// Freshness of a live node.
    pub fn node_state(&self, id: NodeId) -> Option<NodeState> {
        self.inner.graph.borrow().node(id).ok().map(Node::state)
    }

    pub fn is_disposed(&self, id: NodeId) -> bool {
        self.inner.graph.borrow().is_disposed(id)
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.inner.tracker.borrow().is_active()
    }

    /// Whether a read function or effect is running.
    pub fn is_evaluating(&self) -> bool {
        !self.inner.scopes.borrow().is_empty()
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Rc::downgrade(&self.inner))
    }

    pub(crate) fn tracker(&self) -> &RefCell<ChangeTracker> {
        &self.inner.tracker
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.inner.graph.borrow().contains(id)
    }

    pub(crate) fn scope_is_active(&self, scope: ScopeId) -> bool {
        self.inner.scopes.borrow().is_active(scope)
    }

    /// Allocate an id and add the node `build` makes for it.
    pub(crate) fn insert_node(&self, build: impl FnOnce(NodeId) -> Node) -> NodeId {
        let mut graph = self.inner.graph.borrow_mut();
        let id = graph.next_id();
        graph.add_node(build(id));
        drop(graph);
        tracing::trace!(node = %id, "node created");
        id
    }

    /// Read the value of a cell or derived.
    ///
    /// With a reader the read is tracked as a dependency of the reader's
    /// owner. Without one it is a bare read; an unobserved derived read this
    /// way drops its edges again afterwards.
    pub(crate) fn read_value<T: Clone + 'static>(&self, id: NodeId, reader: Option<&Reader>) -> Result<T> {
        if let Some(reader) = reader {
            if !self.scope_is_active(reader.scope()) {
                return Err(ObservableError::InvalidScope { owner: reader.owner() });
            }
            self.inner.graph.borrow().node(id)?;
            self.inner.scopes.borrow_mut().track(reader.scope(), id);
        }

        let value = self.refresh(id).and_then(|()| {
            let graph = self.inner.graph.borrow();
            let node = graph.node(id)?;
            node.current_value()
                .and_then(|value| value.downcast_ref::<T>())
                .cloned()
                .ok_or_else(|| ObservableError::TypeMismatch {
                    name: node.name().to_owned(),
                })
        });

        if reader.is_none() {
            self.release_orphans(vec![id]);
            self.settle()?;
        }
        value
    }

    /// Write a cell, opening an implicit transaction if none is active.
    ///
    /// Writes issued while an evaluation runs are queued and applied once the
    /// outermost evaluation has returned.
    pub(crate) fn write_value(&self, id: NodeId, value: AnyValue) -> Result<()> {
        self.inner.graph.borrow().node(id)?;
        let evaluating = self.inner.scopes.borrow().current_owner();
        if let Some(owner) = evaluating {
            tracing::trace!(node = %id, owner = %owner, "deferring write issued during evaluation");
            self.inner
                .tracker
                .borrow_mut()
                .defer(DeferredWrite { target: id, value });
            return Ok(());
        }
        self.transaction(|_| self.apply_write(id, value))
    }

    /// Store a value into a cell and mark its observers. Must run inside a
    /// batch.
    ///
    /// The old value is moved out of the arena while the equality function
    /// runs, so user code never executes under an arena borrow.
    pub(crate) fn apply_write(&self, id: NodeId, value: AnyValue) -> Result<()> {
        let (name, old, equality) = {
            let mut graph = self.inner.graph.borrow_mut();
            let node = graph.node_mut(id)?;
            let name = node.shared_name();
            match &mut node.body {
                NodeBody::Value { value: slot, equality } => {
                    (name, std::mem::replace(slot, Box::new(())), Rc::clone(equality))
                }
                _ => {
                    return Err(ObservableError::TypeMismatch {
                        name: name.to_string(),
                    })
                }
            }
        };

        let changed = !values_equal(&equality, id, &*old, &*value);

        let frontier = {
            let mut graph = self.inner.graph.borrow_mut();
            let Ok(node) = graph.node_mut(id) else {
                // Disposed by its own equality function.
                return Ok(());
            };
            if let NodeBody::Value { value: slot, .. } = &mut node.body {
                *slot = if changed { value } else { old };
            }
            if changed {
                graph.mark_changed(id)
            } else {
                Frontier::new()
            }
        };
        logging::with_logger(|logger| logger.handle_cell_write(NodeInfo { id, name: &name }, changed));
        if !changed {
            return Ok(());
        }

        let mut tracker = self.inner.tracker.borrow_mut();
        tracker.record_change(id);
        tracker.schedule(frontier);
        Ok(())
    }

    /// Bring a derived or autorun up to date. Cells are always up to date.
    pub(crate) fn refresh(&self, id: NodeId) -> Result<()> {
        let (kind, state) = {
            let graph = self.inner.graph.borrow();
            let node = graph.node(id)?;
            if node.is_computing() && node.kind() != NodeKind::Value {
                return Err(ObservableError::Cycle {
                    name: node.name().to_owned(),
                });
            }
            (node.kind(), node.state())
        };

        if kind == NodeKind::Value || state == NodeState::Clean {
            return Ok(());
        }
        if kind == NodeKind::Derived {
            // Nothing changed since it failed; every other path gets the same error.
            let failure = self.inner.tracker.borrow().failure(id);
            if let Some(err) = failure {
                return Err(err);
            }
        }
        if state == NodeState::MaybeStale && !self.dependencies_changed(id) {
            if let Ok(node) = self.inner.graph.borrow_mut().node_mut(id) {
                node.mark_clean();
            }
            return Ok(());
        }

        match kind {
            NodeKind::Derived => self.recompute(id),
            NodeKind::Autorun => self.run_autorun(id),
            NodeKind::Value => Ok(()),
        }
    }

    /// Settle the derived dependencies of a `MaybeStale` node in order.
    ///
    /// Returns true as soon as one of them changed value (which marks `id`
    /// stale), or could not be settled.
    fn dependencies_changed(&self, id: NodeId) -> bool {
        let dependencies: SmallVec<[NodeId; 8]> = match self.inner.graph.borrow().node(id) {
            Ok(node) => node.dependencies().iter().copied().collect(),
            Err(_) => return true,
        };

        for dependency in dependencies {
            let is_derived = self
                .inner
                .graph
                .borrow()
                .node(dependency)
                .is_ok_and(|node| node.kind() == NodeKind::Derived);
            if is_derived {
                if let Err(err) = self.refresh(dependency) {
                    tracing::debug!(node = %id, dependency = %dependency, error = %err, "dependency failed to settle");
                    if let Ok(node) = self.inner.graph.borrow_mut().node_mut(id) {
                        node.mark_stale();
                    }
                    return true;
                }
            }

            let stale = self
                .inner
                .graph
                .borrow()
                .node(id)
                .map_or(true, |node| node.state() == NodeState::Stale);
            if stale {
                return true;
            }
        }
        false
    }

    /// Run `f` as the evaluation of `id`, then replace `id`'s dependency set
    /// with what `f` read.
    fn evaluate<R>(&self, id: NodeId, f: impl FnOnce(&Reader) -> R) -> R {
        if let Ok(node) = self.inner.graph.borrow_mut().node_mut(id) {
            node.set_computing(true);
        }
        let scope = self.inner.scopes.borrow_mut().enter(id);
        let guard = EvaluationGuard {
            runtime: self,
            id,
            scope,
            finished: false,
        };

        let reader = Reader::new(self.clone(), scope, id);
        let result = f(&reader);
        let observed = guard.finish();

        let orphaned = {
            let mut graph = self.inner.graph.borrow_mut();
            if let Ok(node) = graph.node_mut(id) {
                node.set_computing(false);
            }
            graph.replace_dependencies(id, observed)
        };
        self.release_orphans(orphaned);
        result
    }

    fn recompute(&self, id: NodeId) -> Result<()> {
        let compute = match &self.inner.graph.borrow().node(id)?.body {
            NodeBody::Derived { compute, .. } => Rc::clone(compute),
            _ => return Ok(()),
        };

        let value = match self.evaluate(id, |reader| compute(reader)) {
            Ok(value) => value,
            Err(err) => return self.record_failure(id, err),
        };

        let (name, previous, equality) = {
            let mut graph = self.inner.graph.borrow_mut();
            let Ok(node) = graph.node_mut(id) else {
                // Disposed by its own read function.
                return Ok(());
            };
            let name = node.shared_name();
            match &mut node.body {
                NodeBody::Derived {
                    value: slot, equality, ..
                } => (name, slot.take(), Rc::clone(equality)),
                _ => return Ok(()),
            }
        };

        let changed = match previous.as_deref() {
            Some(old) => !values_equal(&equality, id, old, &*value),
            None => true,
        };

        let frontier = {
            let mut graph = self.inner.graph.borrow_mut();
            let Ok(node) = graph.node_mut(id) else {
                return Ok(());
            };
            if let NodeBody::Derived { value: slot, .. } = &mut node.body {
                *slot = Some(value);
            }
            node.mark_clean();
            if changed {
                graph.mark_changed(id)
            } else {
                Frontier::new()
            }
        };
        drop(previous);

        tracing::trace!(node = %id, name = %name, changed, "derived recomputed");
        logging::with_logger(|logger| logger.handle_derived_recomputed(NodeInfo { id, name: &name }, changed));
        self.schedule(frontier);
        Ok(())
    }

    /// A read function failed: keep the last value, mark the node stale and
    /// remember the error until something changes.
    fn record_failure(&self, id: NodeId, err: ObservableError) -> Result<()> {
        let name = match self.inner.graph.borrow_mut().node_mut(id) {
            Ok(node) => {
                node.mark_stale();
                node.shared_name()
            }
            Err(_) => return Err(err),
        };
        tracing::debug!(node = %id, name = %name, error = %err, "derived failed, keeping last value");
        self.inner.tracker.borrow_mut().record_failure(id, err.clone());
        logging::with_logger(|logger| logger.handle_derived_failed(NodeInfo { id, name: &name }, &err));
        Err(err)
    }

    fn run_autorun(&self, id: NodeId) -> Result<()> {
        let (name, effect, filter, changes) = {
            let mut graph = self.inner.graph.borrow_mut();
            let node = graph.node_mut(id)?;
            let name = node.shared_name();
            match &mut node.body {
                NodeBody::Autorun {
                    effect,
                    filter,
                    changes,
                    ..
                } => (name, Rc::clone(effect), filter.clone(), std::mem::take(changes)),
                _ => return Ok(()),
            }
        };

        if let Some(filter) = filter {
            if !changes.is_empty() {
                // Every change is reported so summaries see all of them.
                let mut wanted = false;
                for changed in &changes {
                    wanted |= filter(&ChangeContext::new(*changed));
                }
                if !wanted {
                    if let Ok(node) = self.inner.graph.borrow_mut().node_mut(id) {
                        node.mark_clean();
                    }
                    return Ok(());
                }
            }
        }

        let result = self.evaluate(id, |reader| match effect.try_borrow_mut() {
            Ok(mut effect) => (&mut *effect)(reader),
            Err(_) => Err(ObservableError::Cycle { name: name.to_string() }),
        });

        if let Ok(node) = self.inner.graph.borrow_mut().node_mut(id) {
            if result.is_ok() {
                node.mark_clean();
            } else {
                node.mark_stale();
            }
        }
        self.inner.tracker.borrow_mut().note_autorun_run();
        tracing::trace!(node = %id, name = %name, ok = result.is_ok(), "autorun ran");
        logging::with_logger(|logger| logger.handle_autorun_run(NodeInfo { id, name: &name }));
        result
    }

    fn schedule(&self, frontier: Frontier) {
        if !frontier.is_empty() {
            self.inner.tracker.borrow_mut().schedule(frontier);
        }
    }

    /// Release unobserved deriveds, cascading to dependencies that lose
    /// their last observer in turn.
    pub(crate) fn release_orphans(&self, mut orphaned: Vec<NodeId>) {
        while let Some(id) = orphaned.pop() {
            if self.inner.scopes.borrow().is_reading(id) {
                continue;
            }
            let more = self.inner.graph.borrow_mut().release(id);
            orphaned.extend(more);
        }
    }

    /// Remove a node and all of its edges. Idempotent.
    pub(crate) fn dispose_node(&self, id: NodeId) {
        let removed = self.inner.graph.borrow_mut().remove_node(id);
        let Some((node, orphaned)) = removed else {
            return;
        };
        self.inner.tracker.borrow_mut().unschedule(id);
        self.release_orphans(orphaned);
        tracing::debug!(node = %id, name = node.name(), "disposed");

        if let NodeBody::Autorun {
            on_dispose: Some(hook), ..
        } = node.body
        {
            hook();
        }
    }

    /// Process work left behind by an evaluation that ran outside of any
    /// transaction (writes it issued, autoruns it reached).
    ///
    /// Outside of every batch and evaluation this is also where remembered
    /// read failures are forgotten, so the next read retries.
    pub(crate) fn settle(&self) -> Result<()> {
        if self.is_evaluating() {
            return Ok(());
        }
        let orphaned_work = {
            let mut tracker = self.inner.tracker.borrow_mut();
            if !tracker.is_active() {
                tracker.clear_failures();
            }
            tracker.has_orphaned_work()
        };
        if orphaned_work {
            self.transaction(|_| Ok(()))
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("node_count", &self.node_count())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

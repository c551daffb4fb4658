//! Update Scheduler
//!
//! The scheduler owns the node arena and every dependency edge. It implements
//! the mark phase of an update; the pull phase lives in the runtime because it
//! has to call back into user code.
//!
//! # Algorithm
//!
//! 1. When a cell (or a recomputed derived) changes, its direct observers are
//!    marked `Stale` and told which dependency changed.
//! 2. Everything transitively reachable from them is marked `MaybeStale`.
//!    Each node is visited once per walk, so diamonds cost one visit.
//! 3. Autoruns reached by the walk are returned as the frontier to settle.
//!
//! Settling pulls dependencies before dependents: a `MaybeStale` node first
//! settles its derived dependencies, and only re-evaluates when one of them
//! reported a real change (which upgrades it to `Stale`).

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;

use super::node::{Node, NodeId, NodeKind};
use crate::error::{ObservableError, Result};

/// Autoruns reached by one mark walk.
pub(crate) type Frontier = SmallVec<[NodeId; 8]>;

static NEXT_GRAPH: AtomicU32 = AtomicU32::new(0);

/// The arena of nodes plus the edges between them.
#[derive(Debug)]
pub(crate) struct UpdateScheduler {
    nodes: IndexMap<NodeId, Node>,
    /// Tag carried by every id this arena hands out.
    graph: u32,
    /// Serial of the next node. Serials are never reused, so any id of this
    /// arena below it that is not live was disposed.
    next_serial: u64,
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateScheduler {
    pub(crate) fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
            graph: NEXT_GRAPH.fetch_add(1, Ordering::Relaxed),
            next_serial: 0,
        }
    }

    /// Allocate the id of the next node.
    pub(crate) fn next_id(&mut self) -> NodeId {
        let id = NodeId::new(self.graph, self.next_serial);
        self.next_serial += 1;
        id
    }

    /// Add a node to the arena.
    pub(crate) fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub(crate) fn is_disposed(&self, id: NodeId) -> bool {
        id.graph() == self.graph && id.serial() < self.next_serial && !self.contains(id)
    }

    fn missing(&self, id: NodeId) -> ObservableError {
        if self.is_disposed(id) {
            ObservableError::Disposed { id }
        } else {
            ObservableError::UnknownNode { id }
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or_else(|| self.missing(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        if !self.nodes.contains_key(&id) {
            return Err(self.missing(id));
        }
        self.nodes.get_mut(&id).ok_or(ObservableError::UnknownNode { id })
    }

    /// A derived node nobody observes and that is not being evaluated.
    fn is_orphan(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(|node| {
            node.kind() == NodeKind::Derived && node.observers().is_empty() && !node.is_computing()
        })
    }

    /// Replace the dependency set of `owner` with the one observed by its
    /// latest evaluation.
    ///
    /// Returns former dependencies that lost their last observer.
    pub(crate) fn replace_dependencies(&mut self, owner: NodeId, observed: IndexSet<NodeId>) -> Vec<NodeId> {
        let Some(node) = self.nodes.get_mut(&owner) else {
            // Disposed while evaluating; its edges are already gone.
            return Vec::new();
        };
        let previous = node.take_dependencies();

        let mut orphaned = Vec::new();
        for dep in previous.iter().filter(|dep| !observed.contains(*dep)) {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.remove_observer(owner);
            }
            if self.is_orphan(*dep) {
                orphaned.push(*dep);
            }
        }

        let mut current = IndexSet::with_capacity(observed.len());
        for dep in observed {
            if dep == owner {
                continue;
            }
            if let Some(dep_node) = self.nodes.get_mut(&dep) {
                dep_node.add_observer(owner);
                current.insert(dep);
            }
        }

        if let Some(node) = self.nodes.get_mut(&owner) {
            node.set_dependencies(current);
        }
        orphaned
    }

    /// Drop every dependency edge of an unobserved derived so it no longer
    /// holds its inputs alive. It recomputes from scratch on next read.
    pub(crate) fn release(&mut self, id: NodeId) -> Vec<NodeId> {
        if !self.is_orphan(id) {
            return Vec::new();
        }
        let dependencies = match self.nodes.get_mut(&id) {
            Some(node) => {
                node.mark_stale();
                node.take_dependencies()
            }
            None => return Vec::new(),
        };

        let mut orphaned = Vec::new();
        for dep in dependencies {
            if let Some(dep_node) = self.nodes.get_mut(&dep) {
                dep_node.remove_observer(id);
            }
            if self.is_orphan(dep) {
                orphaned.push(dep);
            }
        }
        tracing::trace!(node = %id, "released unobserved derived");
        orphaned
    }

    /// Remove a node and every edge involving it.
    ///
    /// Observers of the removed node are marked stale (they will fail on next
    /// evaluation). Returns the removed node and the dependencies that lost
    /// their last observer. Removing an absent node is a no-op.
    pub(crate) fn remove_node(&mut self, id: NodeId) -> Option<(Node, Vec<NodeId>)> {
        let node = self.nodes.swap_remove(&id)?;

        for observer in node.observers() {
            if let Some(observer_node) = self.nodes.get_mut(observer) {
                observer_node.mark_stale();
            }
        }

        let mut orphaned = Vec::new();
        for dep in node.dependencies() {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.remove_observer(id);
            }
            if self.is_orphan(*dep) {
                orphaned.push(*dep);
            }
        }
        Some((node, orphaned))
    }

    /// Mark phase: `source` changed value.
    ///
    /// Direct observers become `Stale`, everything behind them `MaybeStale`.
    /// Nodes that are currently evaluating are skipped: they are reading the
    /// new value right now. Returns the autoruns reached.
    pub(crate) fn mark_changed(&mut self, source: NodeId) -> Frontier {
        let mut reached = Frontier::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        let direct: SmallVec<[NodeId; 8]> = match self.nodes.get(&source) {
            Some(node) => node.observers().iter().copied().collect(),
            None => return reached,
        };

        for id in direct {
            if let Some(node) = self.nodes.get_mut(&id) {
                if node.is_computing() {
                    continue;
                }
                node.mark_stale();
                node.record_change(source);
                queue.push_back(id);
            }
        }

        // BFS to propagate maybe-stale status
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if node.kind() == NodeKind::Autorun {
                reached.push(id);
                continue;
            }

            let observers: SmallVec<[NodeId; 8]> = node.observers().iter().copied().collect();
            for observer in observers {
                if let Some(observer_node) = self.nodes.get_mut(&observer) {
                    if observer_node.is_computing() {
                        continue;
                    }
                    observer_node.mark_maybe_stale();
                    queue.push_back(observer);
                }
            }
        }

        tracing::trace!(source = %source, visited = visited.len(), autoruns = reached.len(), "marked observers");
        reached
    }
}

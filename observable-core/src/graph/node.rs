//! Graph Nodes
//!
//! This module defines the node types that live in the dependency arena.
//! Every node is one of three closed kinds: a settable value cell, a lazily
//! derived value, or an autorun effect.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
#[cfg(test)]
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::error::Result;
use crate::reactive::{ChangeContext, Reader};

/// Unique identifier for a node in the dependency graph.
///
/// An id names the runtime that allocated it plus a serial that is never
/// reused within that runtime, so a handle can never alias a node of another
/// runtime and a disposed id is recognizable without remembering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    graph: u32,
    serial: u64,
}

impl NodeId {
    pub(crate) fn new(graph: u32, serial: u64) -> Self {
        Self { graph, serial }
    }

    /// Allocation order of the node within its runtime.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn graph(&self) -> u32 {
        self.graph
    }

    /// An id outside of every runtime, for tests that only need distinct ids.
    #[cfg(test)]
    pub(crate) fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self::new(u32::MAX, NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.serial)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A settable cell. Cells have observers but never dependencies.
    Value,

    /// A computed value. Has dependencies and may have observers.
    Derived,

    /// An effect. Has dependencies but is never observed.
    Autorun,
}

/// Freshness of a derived value or autorun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Up to date.
    Clean,

    /// Some transitive dependency was written; whether this node's inputs
    /// actually changed has not been checked yet.
    MaybeStale,

    /// A direct dependency changed value. Must re-evaluate before next use.
    Stale,
}

pub(crate) type AnyValue = Box<dyn Any>;
pub(crate) type EqualityFn = Rc<dyn Fn(&dyn Any, &dyn Any) -> bool>;
pub(crate) type ComputeFn = Rc<dyn Fn(&Reader) -> Result<AnyValue>>;
pub(crate) type EffectFn = Rc<RefCell<dyn FnMut(&Reader) -> Result<()>>>;
pub(crate) type ChangeFilter = Rc<dyn Fn(&ChangeContext) -> bool>;
pub(crate) type DisposeHook = Box<dyn FnOnce()>;

/// Type-erase a typed equality function.
///
/// Values of a foreign type compare unequal.
pub(crate) fn erase_equality<T, F>(eq: F) -> EqualityFn
where
    T: 'static,
    F: Fn(&T, &T) -> bool + 'static,
{
    Rc::new(move |a: &dyn Any, b: &dyn Any| {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => eq(a, b),
            _ => false,
        }
    })
}

/// Compare two values, treating a panicking equality function as "changed".
pub(crate) fn values_equal(eq: &EqualityFn, node: NodeId, old: &dyn Any, new: &dyn Any) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| eq(old, new))) {
        Ok(equal) => equal,
        Err(_) => {
            tracing::warn!(node = %node, "equality function panicked, treating values as changed");
            false
        }
    }
}

/// Kind specific payload of a node.
pub(crate) enum NodeBody {
    Value {
        value: AnyValue,
        equality: EqualityFn,
    },
    Derived {
        /// Last successfully computed value.
        value: Option<AnyValue>,
        equality: EqualityFn,
        compute: ComputeFn,
    },
    Autorun {
        effect: EffectFn,
        filter: Option<ChangeFilter>,
        /// Dependencies that reported a change since the last run.
        changes: SmallVec<[NodeId; 4]>,
        on_dispose: Option<DisposeHook>,
    },
}

/// A node in the dependency arena.
pub(crate) struct Node {
    id: NodeId,
    name: Rc<str>,
    state: NodeState,
    /// Set while the node's read function or effect is running.
    computing: bool,
    pub(crate) body: NodeBody,
    /// Nodes this node read during its last evaluation.
    dependencies: IndexSet<NodeId>,
    /// Nodes that read this node during their last evaluation.
    observers: IndexSet<NodeId>,
}

impl Node {
    fn new(id: NodeId, name: String, state: NodeState, body: NodeBody) -> Self {
        Self {
            id,
            name: name.into(),
            state,
            computing: false,
            body,
            dependencies: IndexSet::new(),
            observers: IndexSet::new(),
        }
    }

    /// Create a cell holding `value`.
    pub(crate) fn value(id: NodeId, name: String, value: AnyValue, equality: EqualityFn) -> Self {
        Self::new(id, name, NodeState::Clean, NodeBody::Value { value, equality })
    }

    /// Create a derived node. It starts stale so the first read computes it.
    pub(crate) fn derived(id: NodeId, name: String, compute: ComputeFn, equality: EqualityFn) -> Self {
        Self::new(
            id,
            name,
            NodeState::Stale,
            NodeBody::Derived {
                value: None,
                equality,
                compute,
            },
        )
    }

    /// Create an autorun node. It starts stale so creation runs it once.
    pub(crate) fn autorun(
        id: NodeId,
        name: String,
        effect: EffectFn,
        filter: Option<ChangeFilter>,
        on_dispose: Option<DisposeHook>,
    ) -> Self {
        Self::new(
            id,
            name,
            NodeState::Stale,
            NodeBody::Autorun {
                effect,
                filter,
                changes: SmallVec::new(),
                on_dispose,
            },
        )
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// The name, for use after the arena borrow is released.
    pub(crate) fn shared_name(&self) -> Rc<str> {
        Rc::clone(&self.name)
    }

    pub(crate) fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::Value { .. } => NodeKind::Value,
            NodeBody::Derived { .. } => NodeKind::Derived,
            NodeBody::Autorun { .. } => NodeKind::Autorun,
        }
    }

    pub(crate) fn state(&self) -> NodeState {
        self.state
    }

    pub(crate) fn mark_clean(&mut self) {
        self.state = NodeState::Clean;
    }

    /// Cells are always clean; only computed nodes move to `MaybeStale`.
    pub(crate) fn mark_maybe_stale(&mut self) {
        if self.state == NodeState::Clean && self.kind() != NodeKind::Value {
            self.state = NodeState::MaybeStale;
        }
    }

    pub(crate) fn mark_stale(&mut self) {
        if self.kind() != NodeKind::Value {
            self.state = NodeState::Stale;
        }
    }

    pub(crate) fn is_computing(&self) -> bool {
        self.computing
    }

    pub(crate) fn set_computing(&mut self, computing: bool) {
        self.computing = computing;
    }

    pub(crate) fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    pub(crate) fn take_dependencies(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.dependencies)
    }

    pub(crate) fn set_dependencies(&mut self, dependencies: IndexSet<NodeId>) {
        self.dependencies = dependencies;
    }

    pub(crate) fn observers(&self) -> &IndexSet<NodeId> {
        &self.observers
    }

    pub(crate) fn add_observer(&mut self, node_id: NodeId) {
        self.observers.insert(node_id);
    }

    pub(crate) fn remove_observer(&mut self, node_id: NodeId) -> bool {
        self.observers.swap_remove(&node_id)
    }

    /// Record that dependency `source` changed (autoruns only).
    pub(crate) fn record_change(&mut self, source: NodeId) {
        if let NodeBody::Autorun { changes, .. } = &mut self.body {
            if !changes.contains(&source) {
                changes.push(source);
            }
        }
    }

    /// The stored value of a cell or the cached value of a derived.
    pub(crate) fn current_value(&self) -> Option<&dyn Any> {
        match &self.body {
            NodeBody::Value { value, .. } => Some(&**value),
            NodeBody::Derived { value, .. } => value.as_deref(),
            NodeBody::Autorun { .. } => None,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("state", &self.state)
            .field("dependencies", &self.dependencies)
            .field("observers", &self.observers)
            .finish()
    }
}

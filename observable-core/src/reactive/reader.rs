//! Reader
//!
//! A [`Reader`] is the capability handed to a read function or effect for one
//! evaluation. Reading an observable through it records a dependency edge from
//! the evaluating node to the observable.
//!
//! # Implementation
//!
//! The runtime keeps a stack of evaluation scopes. Entering an evaluation
//! (recomputing a derived, running an autorun) pushes a frame collecting the
//! nodes read; leaving it pops the frame and hands the collected set to the
//! graph. A reader stays bound to its frame's id, so a reader that escapes its
//! evaluation is detected instead of silently tracking into a stale frame.

use std::fmt;

use indexmap::IndexSet;

use super::runtime::Runtime;
use crate::graph::NodeId;

/// Identifies one evaluation scope.
pub(crate) type ScopeId = u64;

#[derive(Debug)]
struct ScopeFrame {
    scope: ScopeId,
    owner: NodeId,
    /// Nodes read during this evaluation, in first-read order.
    observed: IndexSet<NodeId>,
}

/// Stack of evaluations currently in progress.
#[derive(Debug, Default)]
pub(crate) struct ScopeStack {
    frames: Vec<ScopeFrame>,
    next_scope: ScopeId,
}

impl ScopeStack {
    /// Open a new evaluation scope for `owner`.
    pub(crate) fn enter(&mut self, owner: NodeId) -> ScopeId {
        self.next_scope += 1;
        let scope = self.next_scope;
        self.frames.push(ScopeFrame {
            scope,
            owner,
            observed: IndexSet::new(),
        });
        scope
    }

    /// Close `scope`, returning what it read.
    pub(crate) fn exit(&mut self, scope: ScopeId) -> IndexSet<NodeId> {
        let Some(position) = self.frames.iter().rposition(|frame| frame.scope == scope) else {
            return IndexSet::new();
        };
        debug_assert_eq!(
            position + 1,
            self.frames.len(),
            "evaluation scopes must close innermost first"
        );
        self.frames.remove(position).observed
    }

    pub(crate) fn is_active(&self, scope: ScopeId) -> bool {
        self.frames.iter().any(|frame| frame.scope == scope)
    }

    /// Record that `scope` read `dependency`. Returns false if the scope is gone.
    pub(crate) fn track(&mut self, scope: ScopeId, dependency: NodeId) -> bool {
        match self.frames.iter_mut().rev().find(|frame| frame.scope == scope) {
            Some(frame) => {
                frame.observed.insert(dependency);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Whether an evaluation in progress has read `id` (its edge is not
    /// committed yet).
    pub(crate) fn is_reading(&self, id: NodeId) -> bool {
        self.frames.iter().any(|frame| frame.observed.contains(&id))
    }

    /// The node whose evaluation is innermost, if any.
    pub(crate) fn current_owner(&self) -> Option<NodeId> {
        self.frames.last().map(|frame| frame.owner)
    }
}

/// Dependency-recording read capability for one evaluation.
///
/// Readers are cheap to clone, but every clone is tied to the same
/// evaluation: once it returns, reads through any of them fail with
/// [`ObservableError::InvalidScope`](crate::ObservableError::InvalidScope).
#[derive(Clone)]
pub struct Reader {
    runtime: Runtime,
    scope: ScopeId,
    owner: NodeId,
}

impl Reader {
    pub(crate) fn new(runtime: Runtime, scope: ScopeId, owner: NodeId) -> Self {
        Self { runtime, scope, owner }
    }

    /// The runtime this reader belongs to.
    ///
    /// Prefer this over capturing a [`Runtime`] in closures stored in the
    /// graph, which would keep the runtime alive through itself.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// The derived or autorun being evaluated.
    pub fn owner(&self) -> NodeId {
        self.owner
    }

    /// Whether the evaluation this reader was created for is still running.
    pub fn is_active(&self) -> bool {
        self.runtime.scope_is_active(self.scope)
    }

    pub(crate) fn scope(&self) -> ScopeId {
        self.scope
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("owner", &self.owner)
            .field("scope", &self.scope)
            .field("active", &self.is_active())
            .finish()
    }
}

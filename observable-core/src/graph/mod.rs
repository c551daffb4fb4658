//! Dependency Graph
//!
//! This module implements the arena that stores every observable node and
//! the edges between them.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes are value cells, derived values or autoruns
//! - Edges are dependencies: if A read B during its last evaluation, A is an
//!   observer of B and B is a dependency of A
//!
//! # Design Decisions
//!
//! 1. Nodes live in one arena indexed by [`NodeId`]. Handles handed out to
//!    users are plain ids, so there are no ownership cycles between nodes.
//!
//! 2. Both directions of every edge are stored in insertion-ordered sets,
//!    making edge insertion and removal O(1).
//!
//! 3. Edges are rebuilt on every evaluation, so dynamic dependencies never
//!    accumulate.

mod node;
mod scheduler;

pub use node::{NodeId, NodeKind, NodeState};
pub(crate) use node::{erase_equality, values_equal, AnyValue, ChangeFilter, DisposeHook, EffectFn, Node, NodeBody};
pub(crate) use scheduler::{Frontier, UpdateScheduler};

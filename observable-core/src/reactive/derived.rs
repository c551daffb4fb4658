//! Derived Values
//!
//! A derived value is a cached, lazily computed function of other
//! observables.
//!
//! # How Derived Values Work
//!
//! 1. Nothing runs at creation. The first read computes the value and
//!    records what the read function read.
//!
//! 2. A change upstream marks the derived `Stale` (direct dependency) or
//!    `MaybeStale` (somewhere further up).
//!
//! 3. The next read of a `MaybeStale` derived first settles its derived
//!    dependencies; if none of them produced a different value it is marked
//!    clean without running its read function.
//!
//! 4. A recompute that produces an equal value does not invalidate anything
//!    downstream.
//!
//! A derived nobody observes does not stay subscribed to its inputs: a bare
//! read computes it and releases its edges again.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use super::observable::Observable;
use super::reader::Reader;
use super::runtime::Runtime;
use crate::error::Result;
use crate::graph::{erase_equality, AnyValue, Node, NodeId, NodeState};

/// Handle to a derived value of type `T`.
///
/// # Example
///
/// ```rust
/// use observable_core::{Observable, Runtime, SettableObservable};
///
/// let rt = Runtime::new();
/// let width = rt.observable_value("width", 3);
/// let height = rt.observable_value("height", 4);
/// let area = rt.derived("area", move |r| Ok(width.read(r)? * height.read(r)?));
///
/// assert_eq!(area.get(&rt).unwrap(), 12);
/// width.set(&rt, 5).unwrap();
/// assert_eq!(area.get(&rt).unwrap(), 20);
/// ```
pub struct Derived<T> {
    id: NodeId,
    marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Derived<T> {}

impl<T> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Derived").field(&self.id).finish()
    }
}

impl<T: Clone + 'static> Observable<T> for Derived<T> {
    fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> Derived<T> {
    /// Current freshness, or `None` once disposed.
    pub fn state(&self, runtime: &Runtime) -> Option<NodeState> {
        runtime.node_state(self.id)
    }

    /// Remove the derived and its edges. Observers fail on their next
    /// evaluation if they still read it. Idempotent.
    pub fn dispose(&self, runtime: &Runtime) {
        runtime.dispose_node(self.id);
    }
}

impl Runtime {
    /// Create a derived value compared with `PartialEq`.
    pub fn derived<T, F>(&self, name: impl Into<String>, compute: F) -> Derived<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn(&Reader) -> Result<T> + 'static,
    {
        self.derived_with_equality(name, compute, |a: &T, b: &T| a == b)
    }

    /// Create a derived value with a custom equality function. A recompute
    /// whose result is equal to the cached one leaves dependents untouched.
    pub fn derived_with_equality<T, F, E>(&self, name: impl Into<String>, compute: F, equality: E) -> Derived<T>
    where
        T: Clone + 'static,
        F: Fn(&Reader) -> Result<T> + 'static,
        E: Fn(&T, &T) -> bool + 'static,
    {
        let compute = Rc::new(move |reader: &Reader| compute(reader).map(|value| Box::new(value) as AnyValue));
        let id = self.insert_node(|id| Node::derived(id, name.into(), compute, erase_equality(equality)));
        Derived {
            id,
            marker: PhantomData,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

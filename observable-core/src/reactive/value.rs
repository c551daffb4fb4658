//! Observable Values
//!
//! An observable value is the mutable leaf of the graph. It holds a value and
//! notifies its observers when a write changes it.
//!
//! # How Values Work
//!
//! 1. Reading through a [`Reader`](super::Reader) registers the reading
//!    computation as an observer.
//!
//! 2. Writing compares the new value with the current one using the value's
//!    equality function; equal writes are dropped.
//!
//! 3. A real change marks observers and schedules reachable autoruns, which
//!    run when the enclosing (or implicit) transaction commits.

use std::fmt;
use std::marker::PhantomData;

use super::observable::{AsRuntime, Observable, SettableObservable};
use super::runtime::Runtime;
use crate::error::Result;
use crate::graph::{erase_equality, Node, NodeId};

/// Handle to a settable cell holding a `T`.
///
/// # Example
///
/// ```rust
/// use observable_core::{Observable, Runtime, SettableObservable};
///
/// let rt = Runtime::new();
/// let count = rt.observable_value("count", 0);
///
/// count.set(&rt, 5).unwrap();
/// assert_eq!(count.get(&rt).unwrap(), 5);
/// ```
pub struct ObservableValue<T> {
    id: NodeId,
    marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ObservableValue<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObservableValue<T> {}

impl<T> fmt::Debug for ObservableValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObservableValue").field(&self.id).finish()
    }
}

impl<T: Clone + 'static> Observable<T> for ObservableValue<T> {
    fn id(&self) -> NodeId {
        self.id
    }
}

impl<T: Clone + 'static> SettableObservable<T> for ObservableValue<T> {}

impl<T> ObservableValue<T> {
    /// Remove the cell from the graph. Later reads and writes fail with
    /// [`ObservableError::Disposed`](crate::ObservableError::Disposed).
    /// Disposing twice is a no-op.
    pub fn dispose(&self, runtime: &Runtime) {
        runtime.dispose_node(self.id);
    }
}

/// A value-less cell used to signal that something happened.
///
/// Every [`trigger`](Self::trigger) notifies observers; there is no equality
/// check.
#[derive(Clone, Copy, Debug)]
pub struct ObservableSignal {
    id: NodeId,
}

impl Observable<()> for ObservableSignal {
    fn id(&self) -> NodeId {
        self.id
    }
}

impl ObservableSignal {
    /// Notify every observer of this signal.
    pub fn trigger<C: AsRuntime + ?Sized>(&self, cx: &C) -> Result<()> {
        cx.as_runtime().write_value(self.id, Box::new(()))
    }

    pub fn dispose(&self, runtime: &Runtime) {
        runtime.dispose_node(self.id);
    }
}

impl Runtime {
    /// Create a cell compared with `PartialEq`. `name` is diagnostic only.
    pub fn observable_value<T>(&self, name: impl Into<String>, initial: T) -> ObservableValue<T>
    where
        T: Clone + PartialEq + 'static,
    {
        self.observable_value_with_equality(name, initial, |a: &T, b: &T| a == b)
    }

    /// Create a cell with a custom equality function.
    ///
    /// The function must be pure; if it panics the values count as changed.
    pub fn observable_value_with_equality<T, F>(
        &self,
        name: impl Into<String>,
        initial: T,
        equality: F,
    ) -> ObservableValue<T>
    where
        T: Clone + 'static,
        F: Fn(&T, &T) -> bool + 'static,
    {
        let id = self.insert_node(|id| Node::value(id, name.into(), Box::new(initial), erase_equality(equality)));
        ObservableValue {
            id,
            marker: PhantomData,
        }
    }

    /// Create a signal cell.
    pub fn observable_signal(&self, name: impl Into<String>) -> ObservableSignal {
        let name = name.into();
        let id = self.insert_node(|id| Node::value(id, name, Box::new(()), erase_equality(|_: &(), _: &()| false)));
        ObservableSignal { id }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

//! Capabilities shared by observable handles.

use super::reader::Reader;
use super::runtime::Runtime;
use super::transaction::Transaction;
use crate::error::Result;
use crate::graph::NodeId;

/// Anything that can issue reads and writes against a runtime: the runtime
/// itself, an open [`Transaction`], or a [`Reader`] (writes through a reader
/// are deferred until the evaluation returns).
pub trait AsRuntime {
    fn as_runtime(&self) -> &Runtime;
}

impl AsRuntime for Runtime {
    fn as_runtime(&self) -> &Runtime {
        self
    }
}

impl AsRuntime for Transaction<'_> {
    fn as_runtime(&self) -> &Runtime {
        self.runtime()
    }
}

impl AsRuntime for Reader {
    fn as_runtime(&self) -> &Runtime {
        self.runtime()
    }
}

/// A node whose value can be read, tracked or untracked.
pub trait Observable<T: Clone + 'static> {
    /// Id of the underlying graph node.
    fn id(&self) -> NodeId;

    /// Read the value and record a dependency of the reader's owner on it.
    ///
    /// Stale derived values are recomputed first.
    fn read(&self, reader: &Reader) -> Result<T> {
        reader.runtime().read_value(self.id(), Some(reader))
    }

    /// Read the value without tracking it.
    fn get(&self, runtime: &Runtime) -> Result<T> {
        runtime.read_value(self.id(), None)
    }
}

/// An observable that can be written. Only cells implement this.
pub trait SettableObservable<T: Clone + 'static>: Observable<T> {
    /// Store `value`. Equal values (per the cell's equality) are ignored.
    fn set<C: AsRuntime + ?Sized>(&self, cx: &C, value: T) -> Result<()> {
        cx.as_runtime().write_value(self.id(), Box::new(value))
    }

    /// Store `f(current)`.
    fn update<C, F>(&self, cx: &C, f: F) -> Result<()>
    where
        C: AsRuntime + ?Sized,
        F: FnOnce(&T) -> T,
    {
        let current = self.get(cx.as_runtime())?;
        self.set(cx, f(&current))
    }
}

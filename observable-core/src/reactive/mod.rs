//! Reactive Primitives
//!
//! This module implements the user-facing side of the engine: cells, derived
//! values, autoruns and transactions, all reached through an explicit
//! [`Runtime`].
//!
//! # Concepts
//!
//! ## Observable Values
//!
//! A cell holds a value that can be set from outside. Reading it through a
//! [`Reader`] registers the reading computation as an observer; setting it to
//! a value that is not equal to the current one notifies every observer.
//!
//! ## Derived Values
//!
//! A derived value is a cached, lazily evaluated function of other
//! observables. It recomputes only when read after one of its dependencies
//! really changed.
//!
//! ## Autoruns
//!
//! An autorun is a side effect that re-runs after every transaction that
//! changed something it read. Autoruns are the only eager part of the graph.
//!
//! ## Transactions
//!
//! Writes are grouped into transactions. Every write outside an explicit
//! transaction opens an implicit one. When the outermost transaction ends,
//! each autorun reached by its writes runs at most once, after all of the
//! derived values it reads have settled.
//!
//! # Implementation Notes
//!
//! There is no thread-local tracking context. Read functions and effects get
//! a [`Reader`] for the duration of one evaluation, and tracked reads go
//! through it. Dependencies are replaced wholesale after each evaluation, so
//! branches that stop reading an observable also stop depending on it.

mod autorun;
mod derived;
mod disposable;
mod observable;
mod reader;
mod runtime;
mod transaction;
mod value;

pub use autorun::{AutorunHandle, ChangeContext, Delta};
pub use derived::Derived;
pub use disposable::{Disposable, DisposableStore, FnDisposable};
pub use observable::{AsRuntime, Observable, SettableObservable};
pub use reader::Reader;
pub use runtime::Runtime;
pub use transaction::Transaction;
pub use value::{ObservableSignal, ObservableValue};

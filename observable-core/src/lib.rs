//! Observable Core
//!
//! This crate provides a single-threaded observable dependency-tracking
//! engine. It implements:
//!
//! - Settable cells (observable values and signals)
//! - Lazily computed, cached derived values
//! - Autoruns that re-run when something they read changes
//! - Transactions that batch writes into one glitch-free update
//!
//! No computation ever observes a partially updated graph, and every autorun
//! runs at most once per transaction.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: The runtime, handles and transactions
//! - `graph`: Node arena, dependency edges and the mark phase
//! - `logging`: Pluggable observer of engine events
//! - `config`: Runtime configuration
//! - `error`: Error type shared by every fallible operation
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use observable_core::{Observable, Runtime, SettableObservable};
//!
//! let rt = Runtime::new();
//! let count = rt.observable_value("count", 1);
//! let doubled = rt.derived("doubled", move |r| Ok(count.read(r)? * 2));
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let log = Rc::clone(&seen);
//! let _print = rt
//!     .autorun("print", move |r| {
//!         log.borrow_mut().push((count.read(r)?, doubled.read(r)?));
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! rt.transaction(|tx| {
//!     count.set(tx, 2)?;
//!     count.set(tx, 5)
//! })
//! .unwrap();
//!
//! assert_eq!(*seen.borrow(), vec![(1, 2), (5, 10)]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod logging;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{ObservableError, Result};
pub use graph::{NodeId, NodeKind, NodeState};
pub use logging::{ObservableLogger, TracingLogger};
pub use reactive::{
    AsRuntime, AutorunHandle, ChangeContext, Delta, Derived, Disposable, DisposableStore, FnDisposable,
    Observable, ObservableSignal, ObservableValue, Reader, Runtime, SettableObservable, Transaction,
};

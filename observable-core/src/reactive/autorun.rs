//! Autoruns
//!
//! An autorun is a side effect that re-runs whenever something it read
//! really changed.
//!
//! # How Autoruns Work
//!
//! 1. On creation the effect runs once, synchronously, and records what it
//!    read through its [`Reader`].
//!
//! 2. A write that reaches the autorun (directly or through derived values)
//!    adds it to the pending frontier of the active transaction.
//!
//! 3. When the transaction commits, the autorun first settles the derived
//!    values it depends on. It only re-runs if one of its dependencies
//!    produced a different value, and then at most once per commit.
//!
//! 4. Each run replaces the dependency set with what that run read.
//!
//! # Variants
//!
//! - [`Runtime::autorun_delta`] hands the previous and current value of one
//!   observable to a handler.
//! - [`Runtime::autorun_handle_changes`] reports every dependency change to
//!   a filter that accumulates a summary and decides whether to run.
//! - [`Runtime::autorun_with_store`] ties disposables to a single run.
//! - [`Runtime::keep_observed`] keeps a derived subscribed and cached.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::disposable::{Disposable, DisposableStore};
use super::observable::Observable;
use super::reader::Reader;
use super::runtime::{Runtime, WeakRuntime};
use crate::error::Result;
use crate::graph::{ChangeFilter, DisposeHook, EffectFn, Node, NodeId};

/// A dependency change reported to the filter of
/// [`Runtime::autorun_handle_changes`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeContext {
    changed: NodeId,
}

impl ChangeContext {
    pub(crate) fn new(changed: NodeId) -> Self {
        Self { changed }
    }

    /// The dependency whose value changed.
    pub fn changed(&self) -> NodeId {
        self.changed
    }

    /// Whether this change came from `observable`.
    pub fn did_change<T: Clone + 'static>(&self, observable: &impl Observable<T>) -> bool {
        observable.id() == self.changed
    }
}

/// Previous and current value of the observable watched by
/// [`Runtime::autorun_delta`]. `last` is `None` on the first run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delta<T> {
    pub last: Option<T>,
    pub new: T,
}

/// Handle to a running autorun.
///
/// Dropping the handle does not stop the autorun; call
/// [`dispose`](Disposable::dispose).
#[derive(Clone)]
pub struct AutorunHandle {
    id: NodeId,
    runtime: WeakRuntime,
}

impl AutorunHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Whether the autorun was disposed (or its runtime dropped).
    pub fn is_disposed(&self) -> bool {
        self.runtime.upgrade().map_or(true, |runtime| !runtime.contains(self.id))
    }
}

impl Disposable for AutorunHandle {
    fn dispose(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.dispose_node(self.id);
        }
    }
}

impl fmt::Debug for AutorunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutorunHandle")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Runtime {
    /// Run `effect` now and again after every commit that changed something
    /// it read.
    ///
    /// If the first run fails the autorun is disposed and the error returned.
    pub fn autorun<F>(&self, name: impl Into<String>, effect: F) -> Result<AutorunHandle>
    where
        F: FnMut(&Reader) -> Result<()> + 'static,
    {
        let effect: EffectFn = Rc::new(RefCell::new(effect));
        self.create_autorun(name.into(), effect, None, None)
    }

    /// Call `handler` with the previous and current value of `source` each
    /// time it changes.
    pub fn autorun_delta<T, O, F>(&self, name: impl Into<String>, source: O, mut handler: F) -> Result<AutorunHandle>
    where
        T: Clone + 'static,
        O: Observable<T> + 'static,
        F: FnMut(Delta<T>) -> Result<()> + 'static,
    {
        let mut last: Option<T> = None;
        self.autorun(name, move |reader| {
            let new = source.read(reader)?;
            let last = last.replace(new.clone());
            handler(Delta { last, new })
        })
    }

    /// Autorun with a change filter.
    ///
    /// Every real change of a dependency is passed to `handle_change`
    /// together with the summary accumulated since the last run. The effect
    /// runs only if at least one of those calls returned `true`; it receives
    /// the summary, and a fresh one from `create_summary` takes its place.
    /// The first run always happens, with an empty summary.
    pub fn autorun_handle_changes<S, C, H, F>(
        &self,
        name: impl Into<String>,
        create_summary: C,
        handle_change: H,
        mut effect: F,
    ) -> Result<AutorunHandle>
    where
        S: 'static,
        C: Fn() -> S + 'static,
        H: Fn(&ChangeContext, &mut S) -> bool + 'static,
        F: FnMut(&Reader, S) -> Result<()> + 'static,
    {
        let summary = Rc::new(RefCell::new(create_summary()));

        let pending = Rc::clone(&summary);
        let filter: ChangeFilter =
            Rc::new(move |change: &ChangeContext| handle_change(change, &mut *pending.borrow_mut()));

        let effect: EffectFn = Rc::new(RefCell::new(move |reader: &Reader| {
            let current = summary.replace(create_summary());
            effect(reader, current)
        }));
        self.create_autorun(name.into(), effect, Some(filter), None)
    }

    /// Autorun whose effect gets a [`DisposableStore`]. The store is cleared
    /// before every run and when the autorun is disposed.
    pub fn autorun_with_store<F>(&self, name: impl Into<String>, mut effect: F) -> Result<AutorunHandle>
    where
        F: FnMut(&Reader, &DisposableStore) -> Result<()> + 'static,
    {
        let store = Rc::new(DisposableStore::new());

        let run_store = Rc::clone(&store);
        let effect: EffectFn = Rc::new(RefCell::new(move |reader: &Reader| {
            run_store.clear();
            effect(reader, &run_store)
        }));
        let on_dispose: DisposeHook = Box::new(move || store.clear());
        self.create_autorun(name.into(), effect, None, Some(on_dispose))
    }

    /// Observe `source` without doing anything with it, so a derived stays
    /// cached between bare reads instead of being released. The value is
    /// computed right away.
    pub fn keep_observed<T, O>(&self, source: O) -> Result<AutorunHandle>
    where
        T: Clone + 'static,
        O: Observable<T> + 'static,
    {
        let name = format!("keep_observed({})", source.id());
        self.autorun(name, move |reader| source.read(reader).map(drop))
    }

    pub(crate) fn create_autorun(
        &self,
        name: String,
        effect: EffectFn,
        filter: Option<ChangeFilter>,
        on_dispose: Option<DisposeHook>,
    ) -> Result<AutorunHandle> {
        let id = self.insert_node(|id| Node::autorun(id, name, effect, filter, on_dispose));
        let handle = AutorunHandle {
            id,
            runtime: self.downgrade(),
        };

        // The first run may have issued writes; apply them before returning.
        match self.refresh(id).and_then(|()| self.settle()) {
            Ok(()) => Ok(handle),
            Err(err) => {
                self.dispose_node(id);
                Err(err)
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

//! Disposal of autoruns and other resources.

use std::cell::RefCell;
use std::fmt;

/// Something that releases resources when disposed. Disposing twice is a
/// no-op.
pub trait Disposable {
    fn dispose(&self);
}

/// Disposes a closure once.
pub struct FnDisposable {
    f: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl FnDisposable {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self {
            f: RefCell::new(Some(Box::new(f))),
        }
    }
}

impl Disposable for FnDisposable {
    fn dispose(&self) {
        let f = self.f.borrow_mut().take();
        if let Some(f) = f {
            f();
        }
    }
}

impl fmt::Debug for FnDisposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnDisposable")
            .field("disposed", &self.f.borrow().is_none())
            .finish()
    }
}

/// A collection of disposables released together, newest first.
///
/// Used by [`Runtime::autorun_with_store`](super::Runtime::autorun_with_store)
/// to tie resources to a single run of an autorun.
#[derive(Default)]
pub struct DisposableStore {
    items: RefCell<Vec<Box<dyn Disposable>>>,
}

impl DisposableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `item` until the store is cleared.
    pub fn add(&self, item: impl Disposable + 'static) {
        self.items.borrow_mut().push(Box::new(item));
    }

    /// Run `f` when the store is cleared.
    pub fn add_fn(&self, f: impl FnOnce() + 'static) {
        self.add(FnDisposable::new(f));
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// Dispose every item, newest first. Items added while clearing are
    /// disposed too.
    pub fn clear(&self) {
        loop {
            let item = self.items.borrow_mut().pop();
            match item {
                Some(item) => item.dispose(),
                None => break,
            }
        }
    }
}

impl Disposable for DisposableStore {
    fn dispose(&self) {
        self.clear();
    }
}

impl fmt::Debug for DisposableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposableStore").field("len", &self.len()).finish()
    }
}

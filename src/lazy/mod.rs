//! Single-assignment futures with callback propagation.
//!
//! A `Lazy<T>` starts pending and settles exactly once, either to a value or to failure.
//! Observers registered before it settles fire in registration order when it does;
//! observers registered afterwards fire immediately, before registration returns.
//!
//! Handles are reference-counted. Every clone refers to the same cell, so a producer can keep
//! one handle to resolve while consumers hold others to observe.
//!
//! # Examples
//!
//! ```
//! use lazyco::Lazy;
//!
//! let a: Lazy<i32> = Lazy::new();
//! let b: Lazy<i32> = Lazy::new();
//! let sum = &a + &b;
//!
//! b.resolve(5);
//! assert!(sum.is_pending());
//! a.resolve(10);
//! assert_eq!(sum.get(), 15);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::Rc;

use tracing::trace;

use crate::error::{LazyError, Result};

mod ops;

type ReadyCallback<T> = Box<dyn FnOnce(&T)>;
type FailCallback = Box<dyn FnOnce()>;

/// The observable state of a `Lazy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LazyState {
    Pending,
    Ready,
    Failed,
}

impl fmt::Display for LazyState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            LazyState::Pending => "pending",
            LazyState::Ready => "ready",
            LazyState::Failed => "failed",
        };
        f.write_str(s)
    }
}

enum Slot<T> {
    Pending,
    Ready(T),
    Failed,
}

struct Inner<T> {
    slot: Slot<T>,
    ready_callbacks: Vec<ReadyCallback<T>>,
    fail_callbacks: Vec<FailCallback>,
}

impl<T> Inner<T> {
    fn with_slot(slot: Slot<T>) -> Self {
        Inner {
            slot: slot,
            ready_callbacks: Vec::new(),
            fail_callbacks: Vec::new(),
        }
    }

    fn state(&self) -> LazyState {
        match self.slot {
            Slot::Pending => LazyState::Pending,
            Slot::Ready(_) => LazyState::Ready,
            Slot::Failed => LazyState::Failed,
        }
    }
}

/// A shared, single-assignment future.
///
/// See the module documentation.
pub struct Lazy<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Lazy<T> {
    /// Creates a pending future.
    pub fn new() -> Self {
        Self::with_slot(Slot::Pending)
    }

    /// Creates a future that is already ready with the given value.
    pub fn ready(value: T) -> Self {
        Self::with_slot(Slot::Ready(value))
    }

    /// Creates a future that has already failed.
    pub fn failed() -> Self {
        Self::with_slot(Slot::Failed)
    }

    fn with_slot(slot: Slot<T>) -> Self {
        Lazy {
            inner: Rc::new(RefCell::new(Inner::with_slot(slot))),
        }
    }

    pub fn state(&self) -> LazyState {
        self.inner.borrow().state()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == LazyState::Pending
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LazyState::Ready
    }

    pub fn is_failed(&self) -> bool {
        self.state() == LazyState::Failed
    }

    /// Returns true if both handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Lazy<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Registers a callback to run if this future fails.
    ///
    /// If the future has already failed, the callback runs before this returns.
    /// If it is ready, the callback can never fire and is dropped.
    pub fn on_fail<F: FnOnce() + 'static>(&self, f: F) {
        {
            let mut inner = self.inner.borrow_mut();
            match inner.state() {
                LazyState::Pending => {
                    inner.fail_callbacks.push(Box::new(f));
                    return;
                }
                LazyState::Ready => return,
                LazyState::Failed => {}
            }
        }

        f()
    }

    /// Moves this future from pending to failed, then runs every fail callback in registration order.
    ///
    /// Panics if the future is already settled.
    pub fn fail(&self) {
        if let Err(e) = self.try_fail() {
            panic!("Lazy::fail: {}", e);
        }
    }

    /// Like `fail`, but returns `LazyError::AlreadySettled` instead of panicking.
    pub fn try_fail(&self) -> Result<()> {
        let (callbacks, unreachable) = {
            let mut inner = self.inner.borrow_mut();
            let state = inner.state();
            if state != LazyState::Pending {
                return Err(LazyError::AlreadySettled(state));
            }

            inner.slot = Slot::Failed;
            (mem::take(&mut inner.fail_callbacks), mem::take(&mut inner.ready_callbacks))
        };
        // Dropped outside the borrow; their captures may hold handles to this cell.
        drop(unreachable);

        trace!(observers = callbacks.len(), "lazy failed");
        for callback in callbacks {
            callback();
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn observer_count(&self) -> usize {
        let inner = self.inner.borrow();
        inner.ready_callbacks.len() + inner.fail_callbacks.len()
    }
}

impl<T: Clone> Lazy<T> {
    /// Moves this future from pending to ready, then runs every ready callback in registration order.
    ///
    /// The state is committed before the first callback runs, so a callback that registers
    /// further callbacks on this future sees it ready and runs them synchronously.
    ///
    /// Panics if the future is already settled. Assigning a future twice is a caller bug.
    pub fn resolve(&self, value: T) {
        if let Err(e) = self.try_resolve(value) {
            panic!("Lazy::resolve: {}", e);
        }
    }

    /// Like `resolve`, but returns `LazyError::AlreadySettled` instead of panicking.
    pub fn try_resolve(&self, value: T) -> Result<()> {
        let (callbacks, unreachable) = {
            let mut inner = self.inner.borrow_mut();
            let state = inner.state();
            if state != LazyState::Pending {
                return Err(LazyError::AlreadySettled(state));
            }

            inner.slot = Slot::Ready(value.clone());
            (mem::take(&mut inner.ready_callbacks), mem::take(&mut inner.fail_callbacks))
        };
        drop(unreachable);

        trace!(observers = callbacks.len(), "lazy ready");
        for callback in callbacks {
            callback(&value);
        }

        Ok(())
    }

    /// Registers a callback to run with the value once this future is ready.
    ///
    /// If the future is already ready, the callback runs before this returns.
    /// If it has failed, the callback can never fire and is dropped.
    pub fn on_ready<F: FnOnce(&T) + 'static>(&self, f: F) {
        let value = {
            let mut inner = self.inner.borrow_mut();
            if inner.state() == LazyState::Pending {
                inner.ready_callbacks.push(Box::new(f));
                return;
            }

            match inner.slot {
                Slot::Ready(ref value) => value.clone(),
                _ => return,
            }
        };

        f(&value)
    }

    /// Returns the value of this future.
    ///
    /// Panics if the future is not ready. Use `try_get` when that is an expected condition.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(e) => panic!("Lazy::get: {}", e),
        }
    }

    pub fn try_get(&self) -> Result<T> {
        match self.inner.borrow().slot {
            Slot::Ready(ref value) => Ok(value.clone()),
            Slot::Pending => Err(LazyError::NotReady),
            Slot::Failed => Err(LazyError::Failed),
        }
    }
}

impl<T> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Lazy {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Lazy<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<T> for Lazy<T> {
    fn from(value: T) -> Self {
        Self::ready(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.borrow().slot {
            Slot::Pending => f.write_str("Lazy(<pending>)"),
            Slot::Ready(ref value) => f.debug_tuple("Lazy").field(value).finish(),
            Slot::Failed => f.write_str("Lazy(<failed>)"),
        }
    }
}

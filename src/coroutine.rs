//! Coroutine bodies that suspend on `Lazy` futures.
//!
//! A coroutine body is sequential-looking code that waits on futures. When it reaches a future
//! that is still pending, the body registers itself as one of the future's observers and gives
//! control back to whoever drove it. When the future settles, its callback resumes the body
//! synchronously, inside `resolve`, at exactly the point where it stopped.
//!
//! Bodies are written as `async` blocks. Locals live in the block's state machine, so they survive
//! every suspension intact. There is no executor: the only things that resume a body are the
//! futures it waits on.
//!
//! # Examples
//!
//! ```
//! use lazyco::{wait, Coroutine, Lazy, LazyError};
//!
//! let a: Lazy<i32> = Lazy::new();
//! let b: Lazy<i32> = Lazy::new();
//!
//! let (a2, b2) = (a.clone(), b.clone());
//! let co = Coroutine::start(move |co| async move {
//!     let x = wait!(co, a2)?;
//!     let y = wait!(co, b2)?;
//!     Ok::<_, LazyError>(x * y)
//! });
//!
//! a.resolve(6);
//! assert!(!co.is_finished());
//! b.resolve(7);
//! assert_eq!(co.completion().get(), Ok(42));
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::noop_waker_ref;
use tracing::{debug, trace, trace_span, warn};

use crate::error::{LazyError, Result};
use crate::lazy::{Lazy, LazyState};

/// Waits on a `Lazy` from inside a coroutine body, recording the awaited expression in traces.
///
/// `wait!(co, x)` is `co.wait_named("x", &x).await`, and evaluates to `Result<T, LazyError>`.
#[macro_export]
macro_rules! wait {
    ($suspender:expr, $lazy:expr) => {
        $suspender.wait_named(stringify!($lazy), &$lazy).await
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoroutineState {
    /// Not running: either parked on a future, or about to run for the first time.
    Suspended,
    /// The body is on the stack.
    Running,
    /// The body ran to completion and has been dropped.
    Finished,
}

/// The half of a coroutine that waits callbacks can reach without knowing its output type.
trait Resume {
    fn resume(&self);

    /// Called by a wait that is about to return `Pending` with a resume callback in place.
    fn mark_waiting(&self);

    fn name(&self) -> &str;
}

struct Inner<R> {
    name: String,
    state: Cell<CoroutineState>,
    // Set when a resumption arrives while the body is running.
    rewake: Cell<bool>,
    // Set during a poll by every wait that leaves the body parked on a pending future.
    waiting: Cell<bool>,
    body: RefCell<Option<LocalBoxFuture<'static, R>>>,
    completion: Lazy<R>,
}

impl<R: Clone + 'static> Resume for Inner<R> {
    fn resume(&self) {
        match self.state.get() {
            CoroutineState::Suspended => {}
            CoroutineState::Running => {
                self.rewake.set(true);
                return;
            }
            CoroutineState::Finished => {
                // A stale callback from a wait the body no longer needed.
                trace!(coroutine = %self.name, "resume after finish ignored");
                return;
            }
        }

        let mut body = match self.body.borrow_mut().take() {
            Some(body) => body,
            None => return,
        };

        let _span = trace_span!("coroutine", coroutine = %self.name).entered();
        trace!("continue");
        self.state.set(CoroutineState::Running);

        let mut cx = Context::from_waker(noop_waker_ref());
        loop {
            self.rewake.set(false);
            self.waiting.set(false);
            match body.as_mut().poll(&mut cx) {
                Poll::Ready(output) => {
                    drop(body);
                    self.state.set(CoroutineState::Finished);
                    debug!("finished");
                    if let Err(e) = self.completion.try_resolve(output) {
                        warn!(error = %e, "completion settled from outside, output dropped");
                    }
                    return;
                }
                // A future the body waits on settled while the body itself was running.
                Poll::Pending if self.rewake.get() => continue,
                Poll::Pending if self.waiting.get() => break,
                // Nothing holds a resume callback, so the body could never run again.
                Poll::Pending => {
                    self.state.set(CoroutineState::Finished);
                    panic!("coroutine {} suspended without waiting on a Lazy", self.name);
                }
            }
        }

        *self.body.borrow_mut() = Some(body);
        self.state.set(CoroutineState::Suspended);
        trace!("suspended");
    }

    fn mark_waiting(&self) {
        self.waiting.set(true);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Configures a coroutine before starting it.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    name: Option<String>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the coroutine. The name appears in trace spans and in `Debug` output.
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Creates the coroutine and runs its body once.
    ///
    /// `body` receives the `Suspender` the body waits through. This returns when the body
    /// either finishes or suspends on its first pending future.
    pub fn start<R, F, Fut>(self, body: F) -> Coroutine<R> where
    R: Clone + 'static,
    F: FnOnce(Suspender) -> Fut,
    Fut: Future<Output = R> + 'static {
        let name = self.name.unwrap_or_else(|| String::from("coroutine"));

        let inner = Rc::new_cyclic(|weak: &Weak<Inner<R>>| {
            let co: Weak<dyn Resume> = weak.clone();
            Inner {
                name: name,
                state: Cell::new(CoroutineState::Suspended),
                rewake: Cell::new(false),
                waiting: Cell::new(false),
                body: RefCell::new(Some(body(Suspender { co: co }).boxed_local())),
                completion: Lazy::new(),
            }
        });

        debug!(coroutine = %inner.name, "start");
        inner.resume();

        Coroutine {
            inner: inner,
        }
    }
}

/// A handle to a coroutine body.
///
/// A suspended body is kept alive by the callbacks it registered on the future it waits on, so
/// dropping the handle does not abandon it.
pub struct Coroutine<R> {
    inner: Rc<Inner<R>>,
}

impl<R: Clone + 'static> Coroutine<R> {
    /// Starts an unnamed coroutine. See `Builder::start`.
    pub fn start<F, Fut>(body: F) -> Self where
    F: FnOnce(Suspender) -> Fut,
    Fut: Future<Output = R> + 'static {
        Builder::new().start(body)
    }

    pub fn state(&self) -> CoroutineState {
        self.inner.state.get()
    }

    pub fn is_finished(&self) -> bool {
        self.state() == CoroutineState::Finished
    }

    /// A future that becomes ready with the body's output when it finishes.
    ///
    /// The handle is for observing. Settling it from outside does not stop the body; when the
    /// body finishes anyway its output is dropped with a warning.
    pub fn completion(&self) -> Lazy<R> {
        self.inner.completion.clone()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl<R> fmt::Debug for Coroutine<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("name", &self.inner.name)
            .field("state", &self.inner.state.get())
            .finish()
    }
}

/// Passed into a coroutine body. Waiting through it suspends the body on a pending future.
#[derive(Clone)]
pub struct Suspender {
    co: Weak<dyn Resume>,
}

impl Suspender {
    /// Waits for `lazy` to settle.
    ///
    /// If it is already settled this completes without suspending. Otherwise the body suspends
    /// until it is resolved, yielding its value, or failed, yielding `LazyError::Failed`.
    pub fn wait<T: Clone + fmt::Debug + 'static>(&self, lazy: &Lazy<T>) -> WaitFor<T> {
        self.wait_named("<lazy>", lazy)
    }

    /// Like `wait`, with a name for trace output. Usually called through `wait!`.
    pub fn wait_named<T: Clone + fmt::Debug + 'static>(&self, name: &'static str, lazy: &Lazy<T>) -> WaitFor<T> {
        WaitFor {
            co: self.co.clone(),
            lazy: lazy.clone(),
            name: name,
            registered: false,
        }
    }
}

impl fmt::Debug for Suspender {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.co.upgrade() {
            Some(co) => f.debug_tuple("Suspender").field(&co.name()).finish(),
            None => f.write_str("Suspender(<gone>)"),
        }
    }
}

/// The future returned by `Suspender::wait`.
pub struct WaitFor<T> {
    co: Weak<dyn Resume>,
    lazy: Lazy<T>,
    name: &'static str,
    registered: bool,
}

impl<T: Clone + fmt::Debug + 'static> Future for WaitFor<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context) -> Poll<Result<T>> {
        match self.lazy.state() {
            LazyState::Ready => {
                let value = self.lazy.get();
                trace!(lazy = self.name, value = ?value, "ready");
                return Poll::Ready(Ok(value));
            }
            LazyState::Failed => {
                trace!(lazy = self.name, "failed");
                return Poll::Ready(Err(LazyError::Failed));
            }
            LazyState::Pending => {}
        }

        let co = match self.co.upgrade() {
            Some(co) => co,
            None => panic!("wait on {} polled outside its coroutine", self.name),
        };
        co.mark_waiting();

        if !self.registered {
            trace!(lazy = self.name, "wait");
            let on_ready = co.clone();
            self.lazy.on_ready(move |_| on_ready.resume());
            self.lazy.on_fail(move || co.resume());
            self.registered = true;
        }

        Poll::Pending
    }
}

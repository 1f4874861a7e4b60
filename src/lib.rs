//! lazyco: single-assignment futures with callback propagation, a join barrier,
//! and coroutine bodies that suspend on pending futures without blocking the thread.
//!
//! Everything here is single-threaded and cooperative. Handles are `Rc`-based and `!Send`.

pub mod coroutine;
pub use coroutine::{Builder, Coroutine, CoroutineState, Suspender, WaitFor};

mod error;
pub use error::{LazyError, Result};

pub mod join;
pub use join::Join;

pub mod lazy;
pub use lazy::{Lazy, LazyState};

#[cfg(test)]
mod testlib;

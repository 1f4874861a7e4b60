use std::result;

use crate::lazy::LazyState;

/// Errors reported by the non-panicking `Lazy` operations and by coroutine waits.
///
/// Misuse (reading a pending future, settling a settled one) panics instead;
/// see `Lazy::get` and `Lazy::resolve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LazyError {
    /// The future was failed by its producer. Failure carries no payload.
    #[error("future failed")]
    Failed,

    /// The future has no value yet.
    #[error("future is still pending")]
    NotReady,

    /// The future was already settled and cannot be settled again.
    #[error("future already settled as {0}")]
    AlreadySettled(LazyState),
}

pub type Result<T> = result::Result<T, LazyError>;

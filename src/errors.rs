//! Error types for the resource pool

use thiserror::Error;

/// Recoverable failures surfaced by [`Pool::get`](crate::Pool::get) and
/// friends.
///
/// Contract violations, such as returning a resource the pool never handed
/// out, are not represented here. Those corrupt the pool's accounting and
/// abort with a panic instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError<E> {
    /// The pool was closed before or while the operation ran.
    #[error("pool is closed")]
    Closed,

    /// The caller's cancellation token fired before a resource could be
    /// handed over.
    #[error("operation was cancelled")]
    Cancelled,

    /// The `create` callback failed. The callback's error is carried
    /// verbatim; the pool never retries on its own.
    #[error("resource creation failed: {0}")]
    Create(E),
}

pub type PoolResult<T, E> = Result<T, PoolError<E>>;

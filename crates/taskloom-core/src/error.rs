//! Error taxonomy for the engine boundary (spec.md §7). Store and handler
//! errors are distinct *kinds*, not separate type hierarchies: both end up
//! as `anyhow::Error` at the public surface, but wrapping a handler's error
//! in `TaskloomError::Handler` before it reaches `FailTask` lets a handler
//! opt out of retries (via `Categorizable`) without the retry middleware
//! having to know anything about the handler's own error type.

use thiserror::Error;

/// Errors the orchestration loops themselves can produce, plus a typed
/// wrapper around whatever a handler's own call returned.
#[derive(Debug, Error)]
pub enum TaskloomError {
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("no handler registered for task {name:?}")]
    UnknownHandler { name: String },

    #[error("schedule error: {0}")]
    Schedule(#[source] anyhow::Error),

    #[error("handler error: {0}")]
    Handler(#[source] anyhow::Error),
}

/// Lets a handler's own error type opt out of the retry middleware without
/// the middleware having to special-case it. Defaults to retryable, since
/// that is the safer default for at-least-once execution (spec.md §5).
pub trait Categorizable {
    fn is_retryable(&self) -> bool {
        true
    }
}

impl Categorizable for anyhow::Error {}

impl Categorizable for TaskloomError {
    fn is_retryable(&self) -> bool {
        !matches!(self, TaskloomError::UnknownHandler { .. })
    }
}

/// Consults `Categorizable` on the most specific error available: a
/// `TaskloomError` the caller deliberately constructed, falling back to the
/// retryable-by-default blanket impl on `anyhow::Error` otherwise. Shared by
/// the dispatcher's failure path and `retry_middleware` so both agree on
/// whether a given error should ever be retried.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<TaskloomError>() {
        Some(taskloom_err) => taskloom_err.is_retryable(),
        None => err.is_retryable(),
    }
}

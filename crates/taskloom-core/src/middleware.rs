//! Composable wrappers around handler invocation (spec.md §4.6). A
//! middleware takes the rest of the chain (`next`) and returns a new
//! function of the same shape — the same `func(next) func` composition the
//! original's `MiddlewareHandler` type models, just expressed with boxed
//! futures since Rust has no async closures yet.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::TaskContext;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One link in the chain: takes the in-flight context, runs (a handler, or
/// the rest of the chain) against it, returns whether it succeeded.
pub type MiddlewareFunc =
    Arc<dyn for<'a> Fn(&'a mut TaskContext) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync>;

/// A middleware: wraps a `next` link into a new one that runs before and/or
/// after it. Middlewares read and write their own namespaced slot in
/// `task.middlewares_state` to avoid colliding with other middlewares.
pub type MiddlewareHandler = Arc<dyn Fn(MiddlewareFunc) -> MiddlewareFunc + Send + Sync>;

/// Compose a chain right-to-left so the first-registered middleware runs
/// outermost (spec.md §4.2 step 3): service-level middlewares, then
/// handler-local ones, wrapped around `terminal`.
pub fn compose(middlewares: &[MiddlewareHandler], terminal: MiddlewareFunc) -> MiddlewareFunc {
    middlewares
        .iter()
        .rev()
        .fold(terminal, |next, middleware| middleware(next))
}

/// Read a middleware's namespaced state slot, defaulting if absent or
/// malformed — middleware state should never itself be fatal to a task.
pub fn read_state<T: serde::de::DeserializeOwned + Default>(ctx: &TaskContext, key: &str) -> T {
    ctx.task()
        .middlewares_state
        .get(key)
        .and_then(|bytes| serde_json::from_slice(bytes).ok())
        .unwrap_or_default()
}

//! Reference middlewares (SPEC_FULL.md §4.6 expansion), ported from the
//! original's `middlewares/{log,retry,prometheus}.go`.

mod logging;
mod metrics;
mod retry;

pub use logging::logging_middleware;
pub use metrics::{MetricsMiddleware, MetricsSnapshot};
pub use retry::{retry_middleware, RetryOptions};

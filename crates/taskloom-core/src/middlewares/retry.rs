//! Retry middleware, ported from `middlewares/retry.go`. Counts attempts in
//! a namespaced `middlewares_state["__retry"]` slot and calls
//! `ctx.set_retry_after(RetryAfter::Terminal)` once `max_retries` is
//! exhausted, or immediately if the error itself opts out of retries via
//! `Categorizable`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::{RetryAfter, TaskContext};
use crate::error::is_retryable;
use crate::middleware::{read_state, BoxFuture, MiddlewareFunc, MiddlewareHandler};

const STATE_KEY: &str = "__retry";

#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub interval: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RetryState {
    attempt: u32,
}

pub fn retry_middleware(options: RetryOptions) -> MiddlewareHandler {
    Arc::new(move |next: MiddlewareFunc| {
        let next = next.clone();
        let options = options;
        let wrapped: MiddlewareFunc = Arc::new(move |ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
            let next = next.clone();
            Box::pin(async move {
                let result = next(ctx).await;

                if let Err(err) = result {
                    if !is_retryable(&err) {
                        ctx.set_retry_after(RetryAfter::Terminal);
                        return Err(err);
                    }

                    let mut state: RetryState = read_state(ctx, STATE_KEY);
                    state.attempt += 1;
                    ctx.set_middleware_state(STATE_KEY, &state)?;

                    if state.attempt >= options.max_retries {
                        ctx.set_retry_after(RetryAfter::Terminal);
                        anyhow::bail!("a retry limit is exceeded: {err}");
                    }

                    ctx.set_retry_after(RetryAfter::Delay(options.interval));
                    return Err(err);
                }

                Ok(())
            })
        });
        wrapped
    })
}

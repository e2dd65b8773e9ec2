//! Transparent logging middleware, ported from `middlewares/log.go`. Uses
//! `tracing` in place of the original's bare `fmt.Printf`.

use std::sync::Arc;

use crate::context::TaskContext;
use crate::middleware::{BoxFuture, MiddlewareFunc, MiddlewareHandler};

pub fn logging_middleware() -> MiddlewareHandler {
    Arc::new(|next: MiddlewareFunc| {
        let next = next.clone();
        let wrapped: MiddlewareFunc = Arc::new(move |ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
            let next = next.clone();
            Box::pin(async move {
                let name = ctx.task().name.clone();
                tracing::debug!(task_name = %name, bytes = ctx.task().data.len(), "dispatching task");

                let result = next(ctx).await;

                match &result {
                    Ok(()) => tracing::debug!(task_name = %name, "task completed"),
                    Err(err) => tracing::warn!(task_name = %name, error = %err, "task failed"),
                }

                result
            })
        });
        wrapped
    })
}

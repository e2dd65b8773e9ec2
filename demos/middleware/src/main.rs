//! # Middleware Example
//!
//! Wires the bundled logging, metrics, and retry middleware around a
//! handler that always fails, then prints the metrics snapshot once the
//! retry budget is exhausted.

use std::sync::Arc;
use std::time::Duration;

use taskloom_core::{logging_middleware, retry_middleware, BoxFuture, CreateTaskRequest, RetryOptions, TaskContext, Taskloom};
use taskloom_memory::MemoryStore;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(Taskloom::new(store));

    service.use_middleware(logging_middleware());
    service.use_middleware(service.metrics().middleware());
    service.use_middleware(retry_middleware(RetryOptions {
        max_retries: 3,
        interval: Duration::from_secs(5),
    }));

    service.task_handler(
        "failed-task",
        Arc::new(|_ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async move { anyhow::bail!("always return error") })
        }),
    );

    let cancellation = CancellationToken::new();
    let listener = tokio::spawn(service.clone().listen(cancellation.clone()));

    service
        .publish(CreateTaskRequest::new("failed-task", b"fail".to_vec()))
        .await?;

    tokio::time::sleep(Duration::from_secs(20)).await;
    cancellation.cancel();
    listener.await??;

    let snapshot = service.metrics().snapshot("failed-task");
    println!(
        "failed-task metrics: {} successes, {} failures",
        snapshot.success_count, snapshot.failure_count
    );

    Ok(())
}

//! # Simple Publish Example
//!
//! Publishes a handful of delayed tasks to one handler and lets the engine
//! drain them.

use std::sync::Arc;
use std::time::Duration;

use taskloom_core::{BoxFuture, CreateTaskRequest, TaskContext, Taskloom};
use taskloom_memory::MemoryStore;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(Taskloom::new(store));

    service.task_handler(
        "simple",
        Arc::new(|ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async move {
                let message = String::from_utf8_lossy(&ctx.task().data);
                println!("{message}");
                Ok(())
            })
        }),
    );

    let cancellation = CancellationToken::new();
    let listener = tokio::spawn(service.clone().listen(cancellation.clone()));

    for i in 0..10 {
        service
            .publish(CreateTaskRequest::new("simple", format!("hello from {i}").into_bytes()))
            .await?;
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    cancellation.cancel();
    listener.await??;

    Ok(())
}

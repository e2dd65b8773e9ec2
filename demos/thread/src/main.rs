//! # Thread-style Subtasks Example
//!
//! Same fan-out/join shape as the subtasks example, but the child tasks
//! carry no name of their own — they route to the parent's `Subtask`
//! handler instead of their own top-level registration.

use std::sync::Arc;
use std::time::Duration;

use taskloom_core::{BoxFuture, CreateTaskRequest, TaskContext, Taskloom};
use taskloom_memory::MemoryStore;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(Taskloom::new(store));

    service
        .task_handler(
            "task-with-threads",
            Arc::new(|ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
                Box::pin(async move {
                    let word = String::from_utf8_lossy(&ctx.task().data).to_string();
                    println!("have received the word for splitting: {word}");

                    for symbol in word.chars() {
                        ctx.create_subtask(CreateTaskRequest::new("", symbol.to_string().into_bytes()));
                    }

                    Ok(())
                })
            }),
        )
        .subtask(Arc::new(|ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async move {
                let symbol = String::from_utf8_lossy(&ctx.task().data);
                println!("[letter-subtask]: have received symbol: {symbol}");
                Ok(())
            })
        }))
        .on_finish(Arc::new(|_ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async move {
                println!("subtasks are over");
                Ok(())
            })
        }));

    let cancellation = CancellationToken::new();
    let listener = tokio::spawn(service.clone().listen(cancellation.clone()));

    service
        .publish(CreateTaskRequest::new("task-with-threads", b"hello".to_vec()))
        .await?;

    tokio::time::sleep(Duration::from_secs(2)).await;
    cancellation.cancel();
    listener.await??;

    Ok(())
}

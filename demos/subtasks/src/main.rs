//! # Subtask Fan-out/Join Example
//!
//! A task splits a word into one named subtask per letter, then the parent
//! waits (via `OnFinish`) until every letter has been handled before
//! announcing completion.

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
            "task-with-subtasks",
            Arc::new(|ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
                Box::pin(async move {
                    let word = String::from_utf8_lossy(&ctx.task().data).to_string();
                    println!("have received the word for splitting: {word}");

                    for symbol in word.chars() {
                        ctx.create_subtask(CreateTaskRequest::new(
                            "letter-subtask",
                            symbol.to_string().into_bytes(),
                        ));
                    }

                    Ok(())
                })
            }),
        )
        .on_finish(Arc::new(|_ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async move {
                println!("subtasks are over");
                Ok(())
            })
        }));

    service.task_handler(
        "letter-subtask",
        Arc::new(|ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async move {
                let symbol = String::from_utf8_lossy(&ctx.task().data);
                println!("[letter-subtask]: have received symbol: {symbol}");
                Ok(())
            })
        }),
    );

    let cancellation = CancellationToken::new();
    let listener = tokio::spawn(service.clone().listen(cancellation.clone()));

    service
        .publish(CreateTaskRequest::new("task-with-subtasks", b"hello".to_vec()))
        .await?;

    tokio::time::sleep(Duration::from_secs(2)).await;
    cancellation.cancel();
    listener.await??;

    Ok(())
}

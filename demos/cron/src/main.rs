//! # Recurring Job Example
//!
//! Registers a job that fires every 15 seconds, fans each firing out into
//! two subtasks, and announces completion once both have been handled.

use std::sync::Arc;
use std::time::Duration;

use taskloom_core::{BoxFuture, CreateTaskRequest, JobConfig, Schedule, TaskContext, Taskloom};
use taskloom_memory::MemoryStore;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(Taskloom::new(store));

    let schedule = Schedule::from_cron_pattern("@every 15s")?;

    service
        .register_job(
            JobConfig::new("log-job", schedule),
            Arc::new(|ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
                Box::pin(async move {
                    println!("wake up the log-job");

                    ctx.create_subtask(CreateTaskRequest::new("log-subtask", b"Hello 1 subtask".to_vec()));
                    ctx.create_subtask(CreateTaskRequest::new("log-subtask", b"Hello 2 subtask".to_vec()));

                    Ok(())
                })
            }),
        )
        .on_finish(Arc::new(|_ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async move {
                println!("success job log-job");
                Ok(())
            })
        }));

    service.task_handler(
        "log-subtask",
        Arc::new(|ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async move {
                let message = String::from_utf8_lossy(&ctx.task().data);
                println!("message from subtask: {message}");
                Ok(())
            })
        }),
    );

    let cancellation = CancellationToken::new();
    let listener = tokio::spawn(service.clone().listen(cancellation.clone()));

    tokio::time::sleep(Duration::from_secs(35)).await;
    cancellation.cancel();
    listener.await??;

    Ok(())
}

//! Waiting-task reaper (spec.md §4.3), ported from `service.go`'s
//! `ListenWaitingTasks`/`handleWaitingTask`. Drives parents in the
//! `waiting` state toward completion by checking for live children.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::EngineConfig;
use crate::context::TaskContext;
use crate::dispatcher::next_interval;
use crate::error::TaskloomError;
use crate::handler::HandlerRegistry;
use crate::store::Store;
use crate::task::{Task, TaskKind, TaskStatus};

pub struct Reaper {
    store: Arc<dyn Store>,
    registry: HandlerRegistry,
    config: EngineConfig,
}

impl Reaper {
    pub fn new(store: Arc<dyn Store>, registry: HandlerRegistry, config: EngineConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) -> anyhow::Result<()> {
        let (tx, rx) = mpsc::channel::<Task>(self.config.worker_pool_size);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = JoinSet::new();
        for _ in 0..self.config.worker_pool_size {
            let reaper = self.clone();
            let worker_cancellation = cancellation.clone();
            let rx = rx.clone();
            workers.spawn(async move {
                loop {
                    let task = rx.lock().await.recv().await;
                    let Some(task) = task else { break };
                    if let Err(err) = reaper.handle_waiting_task(task, &worker_cancellation).await {
                        warn!(error = %err, "error reaping waiting task");
                    }
                }
            });
        }

        let mut interval = self.config.active_poll_interval;
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    match self.store.find_next_task(&[TaskStatus::Waiting]).await {
                        Ok(Some(task)) => {
                            interval = next_interval(true, &self.config);
                            if tx.send(task).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => interval = next_interval(false, &self.config),
                        Err(err) => warn!(error = %TaskloomError::Store(err), "polling for waiting tasks failed"),
                    }
                }
            }
        }

        drop(tx);
        while workers.join_next().await.is_some() {}

        Ok(())
    }

    async fn handle_waiting_task(&self, task: Task, cancellation: &CancellationToken) -> anyhow::Result<()> {
        if self.store.get_unreleased_task_children(&task).await?.is_some() {
            self.store.wait_task_for_subtasks(&task).await?;
            return Ok(());
        }

        let is_job_firing = matches!(task.kind, TaskKind::JobFiring { .. });
        if !is_job_firing {
            if let Some(registration) = self.registry.get(task.handler_name()) {
                if let Some(on_finish) = registration.on_finish {
                    let mut ctx = TaskContext::new(task.clone(), cancellation.child_token());
                    if let Err(err) = on_finish(&mut ctx).await {
                        // Swallowed per spec.md §9 Open Questions: the
                        // correct behavior here is unspecified upstream.
                        // The parent is left waiting; the next reaper tick
                        // re-checks its children and retries the finalizer.
                        warn!(task_id = %task.id, error = %err, "finalizer returned an error");
                        return Ok(());
                    }
                }
            }
        }

        self.store.release_task(&task).await?;
        Ok(())
    }
}

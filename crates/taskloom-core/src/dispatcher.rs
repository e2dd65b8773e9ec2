//! The dispatcher: continuously advances eligible tasks through one
//! execution step (spec.md §4.2), ported from `service.go`'s
//! `ListenTasks`/`handleTask` and `pool.go`'s generic worker pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::{RetryAfter, TaskContext};
use crate::error::{is_retryable, TaskloomError};
use crate::handler::HandlerRegistry;
use crate::middleware::{compose, MiddlewareFunc, MiddlewareHandler};
use crate::store::Store;
use crate::task::{CreateTaskRequest, Task, TaskKind, TaskStatus};

pub struct Dispatcher {
    store: Arc<dyn Store>,
    registry: HandlerRegistry,
    service_middlewares: Vec<MiddlewareHandler>,
    config: EngineConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        registry: HandlerRegistry,
        service_middlewares: Vec<MiddlewareHandler>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            service_middlewares,
            config,
        }
    }

    /// Runs until `cancellation` fires. Polls the store with an adaptive
    /// interval (1ms busy / 1s idle) and hands each leased task to a
    /// bounded pool of worker tasks sized to the host CPU count.
    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) -> anyhow::Result<()> {
        let (tx, rx) = mpsc::channel::<Task>(self.config.worker_pool_size);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = JoinSet::new();
        for _ in 0..self.config.worker_pool_size {
            let dispatcher = self.clone();
            let rx = rx.clone();
            let worker_cancellation = cancellation.clone();
            workers.spawn(async move {
                loop {
                    let task = rx.lock().await.recv().await;
                    let Some(task) = task else { break };
                    if let Err(err) = dispatcher.handle_task(task, &worker_cancellation).await {
                        warn!(error = %err, "error handling task");
                    }
                }
            });
        }

        let mut interval = self.config.active_poll_interval;
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    match self
                        .store
                        .find_next_task(&[TaskStatus::Created, TaskStatus::InProgress, TaskStatus::Failed])
                        .await
                    {
                        Ok(Some(task)) => {
                            interval = self.config.active_poll_interval;
                            if tx.send(task).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => interval = self.config.idle_poll_interval,
                        Err(err) => warn!(error = %TaskloomError::Store(err), "polling for next task failed"),
                    }
                }
            }
        }

        drop(tx);
        while workers.join_next().await.is_some() {}

        Ok(())
    }

    async fn handle_task(&self, task: Task, cancellation: &CancellationToken) -> anyhow::Result<()> {
        let lookup_name = match &task.kind {
            TaskKind::JobFiring { job_name } => job_name.as_str(),
            _ => task.handler_name(),
        };

        let Some(registration) = self.registry.get(lookup_name) else {
            debug!(task_name = %task.name, "no handler registered; leaving lease to expire");
            return Ok(());
        };

        if registration.depend_on_custom_id && self.store.get_related_task(&task).await?.is_none() {
            debug!(task_id = %task.id, task_name = %task.name, "no related task for DependOnCustomId; no-op");
            return Ok(());
        }

        let handler = match &task.kind {
            TaskKind::JobFiring { .. } => registration
                .job_handler
                .clone()
                .expect("job firing routed to a registration with no job handler"),
            TaskKind::Subtask { .. } if registration.on_subtask.is_some() => {
                registration.on_subtask.clone().unwrap()
            }
            _ => registration
                .handler
                .clone()
                .expect("task routed to a registration with no task handler"),
        };

        let middlewares: Vec<MiddlewareHandler> = self
            .service_middlewares
            .iter()
            .cloned()
            .chain(registration.middlewares.iter().cloned())
            .collect();

        let terminal: MiddlewareFunc = Arc::new(move |ctx: &mut TaskContext| {
            let handler = handler.clone();
            Box::pin(async move { handler(ctx).await })
        });

        let chain = compose(&middlewares, terminal);

        let mut ctx = TaskContext::new(task, cancellation.child_token());
        let result = chain(&mut ctx).await;
        let (task, outcome, state_write) = ctx.into_parts();

        if let Some(state) = state_write {
            self.store.set_state(task.id, state).await?;
        }

        match result {
            Err(err) => {
                let retryable = is_retryable(&err);
                let timeout = match outcome.retry_after {
                    _ if !retryable => None,
                    Some(RetryAfter::Terminal) => None,
                    Some(RetryAfter::Delay(d)) => Some(d),
                    None => Some(self.config.default_retry_delay),
                };
                let error: anyhow::Error = TaskloomError::Handler(err).into();
                self.store.fail_task(&task, &error, timeout).await?;
            }
            Ok(()) => {
                if outcome.subtasks.is_empty() {
                    self.store.release_task(&task).await?;
                } else {
                    let now = Utc::now();
                    for intent in outcome.subtasks {
                        self.store.create_task(build_subtask(&task, intent, now)).await?;
                    }
                    self.store.wait_task_for_subtasks(&task).await?;
                }
            }
        }

        Ok(())
    }
}

/// Realizes a buffered `CreateTaskRequest` into a child `Task`. An empty
/// `name` becomes `__subtask:<parent.name>` and routes to the parent's
/// thread-style `Subtask` handler (`TaskKind::Subtask`); a non-empty name
/// keeps its own routing but is still tracked as a child via `parent`.
fn build_subtask(parent: &Task, intent: CreateTaskRequest, now: chrono::DateTime<Utc>) -> Task {
    let is_thread_style = intent.name.is_empty();
    let (name, kind) = if is_thread_style {
        (format!("__subtask:{}", parent.name), TaskKind::Subtask { parent: parent.id })
    } else {
        (intent.name.clone(), TaskKind::Adhoc)
    };

    Task {
        id: Uuid::new_v4(),
        custom_id: intent.custom_id,
        name,
        data: intent.data,
        job_id: None,
        parent: Some(parent.id),
        kind,
        launch_at: intent.resolve_launch_at(now),
        status: TaskStatus::Created,
        lock_at: None,
        state: Vec::new(),
        middlewares_state: HashMap::new(),
        error: None,
    }
}

/// Poll interval helper shared by the reaper/scheduler loops (kept here so
/// the adaptive-interval shape is defined once).
pub(crate) fn next_interval(found_work: bool, config: &EngineConfig) -> Duration {
    if found_work {
        config.active_poll_interval
    } else {
        config.idle_poll_interval
    }
}

//! [`Taskloom`] — the facade a program builds once and keeps for the life
//! of the process, ported from `service.go`'s `Service`/`NewService`. Wires
//! together task publishing, handler/job registration, and the five
//! concurrent loops `Listen` starts (`ListenTasks`, `ListenWaitingTasks`,
//! `ListenJobs`, `ListenWaitingJobs`, plus the metrics-tick loop this
//! implementation adds — SPEC_FULL.md §11).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::TaskloomError;
use crate::handler::{Handler, HandlerBuilder, HandlerRegistry, JobHandler};
use crate::middleware::MiddlewareHandler;
use crate::middlewares::MetricsMiddleware;
use crate::reaper::Reaper;
use crate::scheduler::JobScheduler;
use crate::store::Store;
use crate::task::{CreateTaskRequest, JobConfig, Task, TaskId, TaskKind, TaskStatus};

/// Owns the store, the handler registry, and the service-level middleware
/// stack; `listen` spawns the loops that actually drive work.
pub struct Taskloom {
    store: Arc<dyn Store>,
    registry: HandlerRegistry,
    middlewares: std::sync::Mutex<Vec<MiddlewareHandler>>,
    config: EngineConfig,
    metrics: MetricsMiddleware,
}

impl Taskloom {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self {
            store,
            registry: HandlerRegistry::new(),
            middlewares: std::sync::Mutex::new(Vec::new()),
            config,
            metrics: MetricsMiddleware::new(),
        }
    }

    /// Registers a service-wide middleware; applied outermost-in-order of
    /// registration, ahead of any handler-local middleware (spec.md §4.2
    /// step 3).
    pub fn use_middleware(&self, middleware: MiddlewareHandler) {
        self.middlewares.lock().unwrap().push(middleware);
    }

    /// Exposes the built-in process-local metrics middleware so a caller can
    /// register it (`use_middleware(service.metrics_middleware())`) and
    /// later read a snapshot back.
    pub fn metrics(&self) -> &MetricsMiddleware {
        &self.metrics
    }

    pub fn task_handler(&self, name: impl Into<String>, handler: Handler) -> HandlerBuilder {
        self.registry.register_task(name, handler)
    }

    pub fn register_job(&self, config: JobConfig, handler: JobHandler) -> HandlerBuilder {
        self.registry.register_job(config, handler)
    }

    /// Enqueue an ad hoc task, ported from `tasks.go`'s `CreateTask` /
    /// `publish.go`'s `PublishOption` plumbing.
    pub async fn publish(&self, request: CreateTaskRequest) -> anyhow::Result<TaskId> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let task = Task {
            id,
            custom_id: request.custom_id.clone(),
            name: request.name.clone(),
            data: request.data.clone(),
            job_id: None,
            parent: None,
            kind: TaskKind::Adhoc,
            launch_at: request.resolve_launch_at(now),
            status: TaskStatus::Created,
            lock_at: None,
            state: Vec::new(),
            middlewares_state: HashMap::new(),
            error: None,
        };
        self.store.create_task(task).await?;
        Ok(id)
    }

    /// Upsert-only variant matching the original's `CreateJob`: registers a
    /// job's schedule with the store without wiring a handler (useful when a
    /// producer process only needs to enroll a job another process handles).
    pub async fn create_job(&self, config: &JobConfig) -> anyhow::Result<()> {
        let next_launch_at = config
            .schedule
            .next_after(Utc::now())
            .map_err(TaskloomError::Schedule)?;
        self.store.register_job(config, next_launch_at).await
    }

    /// Starts every registered job's schedule with the store, then spawns
    /// the dispatcher, reaper, both job-scheduler loops, and the
    /// metrics-tick loop, all sharing `cancellation`. Returns once every
    /// loop has exited (on cancellation) or any one of them returns an
    /// error — mirroring `errgroup.Group`'s fail-fast semantics.
    pub async fn listen(self: Arc<Self>, cancellation: CancellationToken) -> anyhow::Result<()> {
        for config in self.registry.job_configs() {
            let next_launch_at = config
                .schedule
                .next_after(Utc::now())
                .map_err(TaskloomError::Schedule)?;
            self.store.register_job(&config, next_launch_at).await?;
        }

        let middlewares = self.middlewares.lock().unwrap().clone();

        let dispatcher = Arc::new(Dispatcher::new(
            self.store.clone(),
            self.registry.clone(),
            middlewares,
            self.config.clone(),
        ));
        let reaper = Arc::new(Reaper::new(self.store.clone(), self.registry.clone(), self.config.clone()));
        let scheduler = Arc::new(JobScheduler::new(
            self.store.clone(),
            self.registry.clone(),
            self.config.clone(),
        ));

        let mut loops = JoinSet::new();

        let token = cancellation.clone();
        loops.spawn(async move { dispatcher.run(token).await });

        let token = cancellation.clone();
        loops.spawn(async move { reaper.run(token).await });

        let token = cancellation.clone();
        let sched = scheduler.clone();
        loops.spawn(async move { sched.run_due_loop(token).await });

        let token = cancellation.clone();
        loops.spawn(async move { scheduler.run_waiting_loop(token).await });

        let store = self.store.clone();
        let interval = self.config.metrics_tick_interval;
        let token = cancellation.clone();
        loops.spawn(async move { metrics_tick_loop(store, interval, token).await });

        let mut first_error = None;
        while let Some(result) = loops.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                    cancellation.cancel();
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(anyhow::anyhow!(join_err));
                    }
                    cancellation.cancel();
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// SPEC_FULL.md §11 ambient-stack addition: periodically logs a snapshot of
/// `collect_metrics`, in place of the Prometheus exporter the original's
/// `middlewares/prometheus.go` wired into an HTTP handler (out of scope per
/// spec.md §1's "no bundled exporters").
async fn metrics_tick_loop(
    store: Arc<dyn Store>,
    interval: std::time::Duration,
    cancellation: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = cancellation.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {
                match store.collect_metrics().await {
                    Ok(snapshot) => info!(unreleased = snapshot.unreleased, "metrics tick"),
                    Err(err) => debug!(error = %TaskloomError::Store(err), "metrics tick failed"),
                }
            }
        }
    }
}

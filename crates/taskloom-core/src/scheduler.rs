//! Job scheduler (spec.md §4.4), ported from `service.go`'s
//! `ListenJobs`/`ListenWaitingJobs`. Two cooperating loops: one fires due
//! jobs by materializing their per-firing task, the other closes out jobs
//! whose firing has fully drained and reschedules them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::TaskContext;
use crate::dispatcher::next_interval;
use crate::error::TaskloomError;
use crate::handler::HandlerRegistry;
use crate::store::Store;
use crate::task::{Job, JobStatus, Task, TaskKind, TaskStatus};

pub struct JobScheduler {
    store: Arc<dyn Store>,
    registry: HandlerRegistry,
    config: EngineConfig,
}

impl JobScheduler {
    pub fn new(store: Arc<dyn Store>, registry: HandlerRegistry, config: EngineConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Materializes one task per due job firing, then parks the job
    /// (`wait_job_for_subtasks`) pending that firing's completion. Includes
    /// `in_progress` jobs in the lease query so a crashed worker's lease can
    /// be recovered after the job lease window expires.
    pub async fn run_due_loop(self: Arc<Self>, cancellation: CancellationToken) -> anyhow::Result<()> {
        let mut interval = self.config.active_poll_interval;
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => return Ok(()),
                _ = tokio::time::sleep(interval) => {
                    match self
                        .store
                        .find_next_job(&[JobStatus::InProgress, JobStatus::Created, JobStatus::Released])
                        .await
                    {
                        Ok(Some(job)) => {
                            interval = next_interval(true, &self.config);
                            if let Err(err) = self.fire_job(&job).await {
                                warn!(job_name = %job.name, error = %err, "error firing due job");
                            }
                        }
                        Ok(None) => interval = next_interval(false, &self.config),
                        Err(err) => warn!(error = %TaskloomError::Store(err), "polling for due jobs failed"),
                    }
                }
            }
        }
    }

    async fn fire_job(&self, job: &Job) -> anyhow::Result<()> {
        let firing = Task {
            id: Uuid::new_v4(),
            custom_id: None,
            name: format!("__job:{}", job.name),
            data: Vec::new(),
            job_id: Some(job.name.clone()),
            parent: None,
            kind: TaskKind::JobFiring { job_name: job.name.clone() },
            launch_at: Utc::now(),
            status: TaskStatus::Created,
            lock_at: None,
            state: Vec::new(),
            middlewares_state: HashMap::new(),
            error: None,
        };

        self.store.create_task(firing).await?;
        self.store.wait_job_for_subtasks(job).await
    }

    /// Closes out a job whose firing has fully drained: runs its finalizer
    /// (if any), recomputes `next_launch_at` from its schedule, and
    /// releases it back to the due-job loop.
    pub async fn run_waiting_loop(self: Arc<Self>, cancellation: CancellationToken) -> anyhow::Result<()> {
        let mut interval = self.config.idle_poll_interval;
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => return Ok(()),
                _ = tokio::time::sleep(interval) => {
                    match self.store.find_next_job(&[JobStatus::Waiting]).await {
                        Ok(Some(job)) => {
                            interval = next_interval(true, &self.config);
                            if let Err(err) = self.settle_waiting_job(&job, &cancellation).await {
                                warn!(job_name = %job.name, error = %err, "error settling waiting job");
                            }
                        }
                        Ok(None) => interval = next_interval(false, &self.config),
                        Err(err) => warn!(error = %TaskloomError::Store(err), "polling for waiting jobs failed"),
                    }
                }
            }
        }
    }

    async fn settle_waiting_job(&self, job: &Job, cancellation: &CancellationToken) -> anyhow::Result<()> {
        if self.store.get_unreleased_job_children(&job.name).await?.is_some() {
            self.store.wait_job_for_subtasks(job).await?;
            return Ok(());
        }

        if let Some(registration) = self.registry.get(&job.name) {
            if let Some(on_finish) = registration.on_finish {
                let placeholder = Task {
                    id: Uuid::nil(),
                    custom_id: job.custom_id.clone(),
                    name: job.name.clone(),
                    data: Vec::new(),
                    job_id: Some(job.name.clone()),
                    parent: None,
                    kind: TaskKind::JobFiring { job_name: job.name.clone() },
                    launch_at: Utc::now(),
                    status: TaskStatus::Waiting,
                    lock_at: None,
                    state: Vec::new(),
                    middlewares_state: HashMap::new(),
                    error: None,
                };
                let mut ctx = TaskContext::new(placeholder, cancellation.child_token());
                if let Err(err) = on_finish(&mut ctx).await {
                    // Swallowed per spec.md §9 Open Questions, same as the
                    // task-level finalizer.
                    warn!(job_name = %job.name, error = %err, "job finalizer returned an error");
                }
            }
        }

        let next_launch_at = registration_next_launch_at(&self.registry, job)?;
        self.store.release_job(job, next_launch_at).await
    }
}

fn registration_next_launch_at(registry: &HandlerRegistry, job: &Job) -> anyhow::Result<chrono::DateTime<Utc>> {
    let registration = registry
        .get(&job.name)
        .ok_or_else(|| anyhow::anyhow!("job {:?} has no registration (was it unregistered mid-flight?)", job.name))?;
    let job_config = registration
        .job_config
        .ok_or_else(|| anyhow::anyhow!("job {:?} registration has no schedule", job.name))?;
    Ok(job_config
        .schedule
        .next_after(Utc::now())
        .map_err(TaskloomError::Schedule)?)
}

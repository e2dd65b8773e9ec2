//! An in-process [`taskloom_core::Store`] backed by [`DashMap`], used by
//! taskloom-core's own test suite and by the demo binaries. Mirrors
//! `taskloom-postgres`'s semantics (same lease windows, same
//! clear-launch_at-on-terminal-failure trick) without a database.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use taskloom_core::{
    Job, JobConfig, JobStatus, Store, Task, TaskId, TaskMetricsSnapshot, TaskStatus,
};

/// A `launch_at`/`next_launch_at` this far in the future is treated as
/// "never" — the in-memory analogue of `taskloom-postgres` setting the
/// column to `NULL` on a terminal task failure.
fn never() -> DateTime<Utc> {
    DateTime::<Utc>::MAX_UTC
}

#[derive(Clone)]
pub struct MemoryStore {
    tasks: Arc<DashMap<TaskId, Task>>,
    jobs: Arc<DashMap<String, Job>>,
    task_lease_window: Duration,
    job_lease_window: Duration,
    task_wait_bounce: Duration,
    job_wait_bounce: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            jobs: Arc::new(DashMap::new()),
            task_lease_window: Duration::from_secs(60),
            job_lease_window: Duration::from_secs(5 * 60),
            task_wait_bounce: Duration::from_secs(1),
            job_wait_bounce: Duration::from_secs(5),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease_windows(mut self, task_lease_window: Duration, job_lease_window: Duration) -> Self {
        self.task_lease_window = task_lease_window;
        self.job_lease_window = job_lease_window;
        self
    }

    /// Snapshot of every task currently held, for assertions in tests.
    pub fn dump_tasks(&self) -> Vec<Task> {
        self.tasks.iter().map(|e| e.clone()).collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn find_next_task(&self, statuses: &[TaskStatus]) -> anyhow::Result<Option<Task>> {
        let now = Utc::now();
        let lock_cutoff = now - chrono::Duration::from_std(self.task_lease_window)?;

        let mut candidates: Vec<(TaskId, DateTime<Utc>)> = self
            .tasks
            .iter()
            .filter(|entry| {
                statuses.contains(&entry.status)
                    && entry.launch_at <= now
                    && entry.lock_at.map_or(true, |lock_at| lock_at <= lock_cutoff)
            })
            .map(|entry| (*entry.key(), entry.launch_at))
            .collect();
        candidates.sort_by_key(|(_, launch_at)| *launch_at);

        for (id, _) in candidates {
            if let Some(mut entry) = self.tasks.get_mut(&id) {
                let still_eligible = statuses.contains(&entry.status)
                    && entry.launch_at <= now
                    && entry.lock_at.map_or(true, |lock_at| lock_at <= lock_cutoff);
                if still_eligible {
                    entry.status = TaskStatus::InProgress;
                    entry.lock_at = Some(now);
                    return Ok(Some(entry.clone()));
                }
            }
        }

        Ok(None)
    }

    async fn create_task(&self, task: Task) -> anyhow::Result<()> {
        self.tasks.insert(task.id, task);
        Ok(())
    }

    async fn set_state(&self, id: TaskId, state: Vec<u8>) -> anyhow::Result<()> {
        if let Some(mut entry) = self.tasks.get_mut(&id) {
            entry.state = state;
        }
        Ok(())
    }

    async fn release_task(&self, task: &Task) -> anyhow::Result<()> {
        if let Some(mut entry) = self.tasks.get_mut(&task.id) {
            entry.status = TaskStatus::Released;
            entry.lock_at = None;
        }
        Ok(())
    }

    async fn wait_task_for_subtasks(&self, task: &Task) -> anyhow::Result<()> {
        if let Some(mut entry) = self.tasks.get_mut(&task.id) {
            entry.status = TaskStatus::Waiting;
            entry.launch_at = Utc::now() + chrono::Duration::from_std(self.task_wait_bounce)?;
            entry.lock_at = None;
        }
        Ok(())
    }

    async fn fail_task(&self, task: &Task, error: &anyhow::Error, timeout: Option<Duration>) -> anyhow::Result<()> {
        if let Some(mut entry) = self.tasks.get_mut(&task.id) {
            entry.status = TaskStatus::Failed;
            entry.error = Some(format!("{error:#}"));
            entry.lock_at = None;
            entry.launch_at = match timeout {
                Some(delay) => Utc::now() + chrono::Duration::from_std(delay)?,
                None => never(),
            };
        }
        Ok(())
    }

    async fn get_unreleased_task_children(&self, task: &Task) -> anyhow::Result<Option<Task>> {
        Ok(self
            .tasks
            .iter()
            .find(|entry| entry.parent == Some(task.id) && entry.status != TaskStatus::Released)
            .map(|entry| entry.clone()))
    }

    async fn get_related_task(&self, task: &Task) -> anyhow::Result<Option<Task>> {
        if task.custom_id.is_none() {
            return Ok(None);
        }
        Ok(self
            .tasks
            .iter()
            .find(|entry| {
                entry.id != task.id
                    && entry.name == task.name
                    && entry.custom_id == task.custom_id
                    && entry.status != TaskStatus::Released
            })
            .map(|entry| entry.clone()))
    }

    async fn collect_metrics(&self) -> anyhow::Result<TaskMetricsSnapshot> {
        let unreleased = self
            .tasks
            .iter()
            .filter(|entry| entry.status != TaskStatus::Released)
            .count() as u64;
        Ok(TaskMetricsSnapshot { unreleased })
    }

    async fn find_next_job(&self, statuses: &[JobStatus]) -> anyhow::Result<Option<Job>> {
        let now = Utc::now();
        let lock_cutoff = now - chrono::Duration::from_std(self.job_lease_window)?;

        let mut candidates: Vec<(String, DateTime<Utc>)> = self
            .jobs
            .iter()
            .filter(|entry| {
                statuses.contains(&entry.status)
                    && entry.next_launch_at <= now
                    && entry.lock_at.map_or(true, |lock_at| lock_at <= lock_cutoff)
            })
            .map(|entry| (entry.key().clone(), entry.next_launch_at))
            .collect();
        candidates.sort_by_key(|(_, next_launch_at)| *next_launch_at);

        for (name, _) in candidates {
            if let Some(mut entry) = self.jobs.get_mut(&name) {
                let still_eligible = statuses.contains(&entry.status)
                    && entry.next_launch_at <= now
                    && entry.lock_at.map_or(true, |lock_at| lock_at <= lock_cutoff);
                if still_eligible {
                    entry.status = JobStatus::InProgress;
                    entry.lock_at = Some(now);
                    return Ok(Some(entry.clone()));
                }
            }
        }

        Ok(None)
    }

    async fn get_unreleased_job_children(&self, job_name: &str) -> anyhow::Result<Option<Task>> {
        Ok(self
            .tasks
            .iter()
            .find(|entry| entry.job_id.as_deref() == Some(job_name) && entry.status != TaskStatus::Released)
            .map(|entry| entry.clone()))
    }

    async fn register_job(&self, cfg: &JobConfig, next_launch_at: DateTime<Utc>) -> anyhow::Result<()> {
        let (pattern, rrule_pattern) = cfg.schedule.to_stored();
        match self.jobs.get_mut(&cfg.name) {
            Some(mut entry) => {
                entry.pattern = pattern;
                entry.rrule_pattern = rrule_pattern;
                entry.tags = cfg.tags.clone();
            }
            None => {
                self.jobs.insert(
                    cfg.name.clone(),
                    Job {
                        name: cfg.name.clone(),
                        status: JobStatus::Released,
                        pattern,
                        rrule_pattern,
                        next_launch_at,
                        custom_id: cfg.custom_id.clone(),
                        lock_at: None,
                        tags: cfg.tags.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn release_job(&self, job: &Job, next_launch_at: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(mut entry) = self.jobs.get_mut(&job.name) {
            entry.status = JobStatus::Released;
            entry.next_launch_at = next_launch_at;
            entry.lock_at = None;
        }
        Ok(())
    }

    async fn wait_job_for_subtasks(&self, job: &Job) -> anyhow::Result<()> {
        if let Some(mut entry) = self.jobs.get_mut(&job.name) {
            entry.status = JobStatus::Waiting;
            entry.next_launch_at = Utc::now() + chrono::Duration::from_std(self.job_wait_bounce)?;
            entry.lock_at = None;
        }
        Ok(())
    }
}

//! [`Store`] — the narrow, atomic-CAS interface every persistence backend
//! implements (spec.md §4.1). Out of scope per spec.md §1: this module only
//! names the interface; `taskloom-postgres` and `taskloom-memory` are the
//! reference adapters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::task::{Job, JobConfig, Task, TaskId, TaskStatus};

/// Snapshot the metrics-tick loop reads back from the store on each tick
/// (SPEC_FULL.md §4.1 expansion).
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskMetricsSnapshot {
    pub unreleased: u64,
}

/// Atomic, conditional mutation surface sufficient to implement leasing.
/// Every write that changes `status` or `lock_at` must be observable
/// atomically with its precondition match (spec.md §4.1).
#[async_trait]
pub trait Store: Send + Sync {
    /// Create any required indexes/tables. Idempotent.
    async fn init(&self) -> anyhow::Result<()>;

    // -- Tasks ---------------------------------------------------------

    /// Atomically lease one task whose `status` is in `statuses`,
    /// `launch_at <= now`, and whose lock (if any) has expired.
    async fn find_next_task(&self, statuses: &[TaskStatus]) -> anyhow::Result<Option<Task>>;

    async fn create_task(&self, task: Task) -> anyhow::Result<()>;

    async fn set_state(&self, id: TaskId, state: Vec<u8>) -> anyhow::Result<()>;

    async fn release_task(&self, task: &Task) -> anyhow::Result<()>;

    async fn wait_task_for_subtasks(&self, task: &Task) -> anyhow::Result<()>;

    async fn fail_task(
        &self,
        task: &Task,
        error: &anyhow::Error,
        timeout: Option<std::time::Duration>,
    ) -> anyhow::Result<()>;

    /// Any child of `task` that has not yet released (`created`,
    /// `in_progress`, `waiting`, or `failed` with a pending retry).
    async fn get_unreleased_task_children(&self, task: &Task) -> anyhow::Result<Option<Task>>;

    /// Lookup by `(name, custom_id)` excluding `released`, for
    /// `DependOnCustomId` gating.
    async fn get_related_task(&self, task: &Task) -> anyhow::Result<Option<Task>>;

    async fn collect_metrics(&self) -> anyhow::Result<TaskMetricsSnapshot>;

    // -- Jobs ------------------------------------------------------------

    async fn find_next_job(&self, statuses: &[crate::task::JobStatus]) -> anyhow::Result<Option<Job>>;

    async fn get_unreleased_job_children(&self, job_name: &str) -> anyhow::Result<Option<Task>>;

    async fn register_job(&self, cfg: &JobConfig, next_launch_at: DateTime<Utc>) -> anyhow::Result<()>;

    async fn release_job(&self, job: &Job, next_launch_at: DateTime<Utc>) -> anyhow::Result<()>;

    async fn wait_job_for_subtasks(&self, job: &Job) -> anyhow::Result<()>;
}

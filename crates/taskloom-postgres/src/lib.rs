//! A PostgreSQL-backed [`taskloom_core::Store`].
//!
//! Generalizes the single-table `FOR UPDATE SKIP LOCKED` leasing pattern to
//! the dual `tasks`/`jobs` schema taskloom-core's engine drives, keeping the
//! same shape: a `SELECT ... FOR UPDATE SKIP LOCKED` CTE feeding an `UPDATE
//! ... RETURNING` so the claim and the read happen in one round trip and two
//! workers can never win the same row.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE tasks (
//!     id              UUID PRIMARY KEY,
//!     custom_id       TEXT,
//!     name            TEXT NOT NULL,
//!     data            BYTEA NOT NULL DEFAULT '',
//!     job_id          TEXT,
//!     parent          UUID,
//!     kind            TEXT NOT NULL,
//!     launch_at       TIMESTAMPTZ,
//!     status          TEXT NOT NULL,
//!     lock_at         TIMESTAMPTZ,
//!     state           BYTEA NOT NULL DEFAULT '',
//!     middlewares_state BYTEA NOT NULL DEFAULT '',
//!     error           TEXT
//! );
//!
//! CREATE INDEX idx_tasks_ready ON tasks (launch_at) WHERE status <> 'released';
//! CREATE INDEX idx_tasks_parent ON tasks (parent) WHERE status <> 'released';
//! CREATE INDEX idx_tasks_job ON tasks (job_id) WHERE status <> 'released';
//!
//! CREATE TABLE jobs (
//!     name            TEXT PRIMARY KEY,
//!     status          TEXT NOT NULL,
//!     pattern         TEXT,
//!     rrule_pattern   TEXT,
//!     next_launch_at  TIMESTAMPTZ NOT NULL,
//!     custom_id       TEXT,
//!     lock_at         TIMESTAMPTZ,
//!     tags            TEXT[] NOT NULL DEFAULT '{}'
//! );
//! ```
//!
//! `launch_at` is nullable: a terminal task failure clears it so the row
//! drops out of every `launch_at <= NOW()` lease query without needing a
//! dedicated "dead" status the rest of the engine would have to know about.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use taskloom_core::{
    Job, JobConfig, JobStatus, Store, Task, TaskId, TaskKind, TaskMetricsSnapshot, TaskStatus,
};

/// PostgreSQL-backed store. Leasing windows are configurable; defaults match
/// [`taskloom_core::EngineConfig`]'s.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    task_lease_window: Duration,
    job_lease_window: Duration,
    task_wait_bounce: Duration,
    job_wait_bounce: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            task_lease_window: Duration::from_secs(60),
            job_lease_window: Duration::from_secs(5 * 60),
            task_wait_bounce: Duration::from_secs(1),
            job_wait_bounce: Duration::from_secs(5),
        }
    }

    pub fn with_lease_windows(mut self, task_lease_window: Duration, job_lease_window: Duration) -> Self {
        self.task_lease_window = task_lease_window;
        self.job_lease_window = job_lease_window;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> anyhow::Result<Task> {
        let kind_tag: String = row.try_get("kind")?;
        let job_id: Option<String> = row.try_get("job_id")?;
        let parent: Option<TaskId> = row.try_get("parent")?;
        let kind = match kind_tag.as_str() {
            "adhoc" => TaskKind::Adhoc,
            "subtask" => TaskKind::Subtask {
                parent: parent.context("subtask row missing parent")?,
            },
            "job_firing" => TaskKind::JobFiring {
                job_name: job_id.clone().context("job_firing row missing job_id")?,
            },
            other => anyhow::bail!("unrecognized task kind {other:?}"),
        };

        let status: String = row.try_get("status")?;
        let middlewares_state_bytes: Vec<u8> = row.try_get("middlewares_state")?;
        let middlewares_state: HashMap<String, Vec<u8>> = if middlewares_state_bytes.is_empty() {
            HashMap::new()
        } else {
            serde_json::from_slice(&middlewares_state_bytes)?
        };

        Ok(Task {
            id: row.try_get("id")?,
            custom_id: row.try_get("custom_id")?,
            name: row.try_get("name")?,
            data: row.try_get("data")?,
            job_id,
            parent,
            kind,
            launch_at: row.try_get::<Option<DateTime<Utc>>, _>("launch_at")?.context("dead task row returned from a live query")?,
            status: parse_task_status(&status)?,
            lock_at: row.try_get("lock_at")?,
            state: row.try_get("state")?,
            middlewares_state,
            error: row.try_get("error")?,
        })
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> anyhow::Result<Job> {
        let status: String = row.try_get("status")?;
        Ok(Job {
            name: row.try_get("name")?,
            status: parse_job_status(&status)?,
            pattern: row.try_get("pattern")?,
            rrule_pattern: row.try_get("rrule_pattern")?,
            next_launch_at: row.try_get("next_launch_at")?,
            custom_id: row.try_get("custom_id")?,
            lock_at: row.try_get("lock_at")?,
            tags: row.try_get("tags")?,
        })
    }
}

fn task_status_str(status: TaskStatus) -> &'static str {
    status.as_str()
}

fn parse_task_status(s: &str) -> anyhow::Result<TaskStatus> {
    Ok(match s {
        "created" => TaskStatus::Created,
        "in_progress" => TaskStatus::InProgress,
        "waiting" => TaskStatus::Waiting,
        "failed" => TaskStatus::Failed,
        "released" => TaskStatus::Released,
        other => anyhow::bail!("unrecognized task status {other:?}"),
    })
}

fn parse_job_status(s: &str) -> anyhow::Result<JobStatus> {
    Ok(match s {
        "created" => JobStatus::Created,
        "in_progress" => JobStatus::InProgress,
        "waiting" => JobStatus::Waiting,
        "released" => JobStatus::Released,
        other => anyhow::bail!("unrecognized job status {other:?}"),
    })
}

fn kind_tag(kind: &TaskKind) -> &'static str {
    match kind {
        TaskKind::Adhoc => "adhoc",
        TaskKind::Subtask { .. } => "subtask",
        TaskKind::JobFiring { .. } => "job_firing",
    }
}

#[async_trait]
impl Store for PgStore {
    async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id UUID PRIMARY KEY,
                custom_id TEXT,
                name TEXT NOT NULL,
                data BYTEA NOT NULL DEFAULT '',
                job_id TEXT,
                parent UUID,
                kind TEXT NOT NULL,
                launch_at TIMESTAMPTZ,
                status TEXT NOT NULL,
                lock_at TIMESTAMPTZ,
                state BYTEA NOT NULL DEFAULT '',
                middlewares_state BYTEA NOT NULL DEFAULT '',
                error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_ready ON tasks (launch_at) WHERE status <> 'released'")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks (parent) WHERE status <> 'released'")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_job ON tasks (job_id) WHERE status <> 'released'")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                name TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                pattern TEXT,
                rrule_pattern TEXT,
                next_launch_at TIMESTAMPTZ NOT NULL,
                custom_id TEXT,
                lock_at TIMESTAMPTZ,
                tags TEXT[] NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_next_task(&self, statuses: &[TaskStatus]) -> anyhow::Result<Option<Task>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let lock_cutoff = Utc::now() - chrono::Duration::from_std(self.task_lease_window)?;

        let row = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM tasks
                WHERE status = ANY($1)
                  AND launch_at IS NOT NULL
                  AND launch_at <= NOW()
                  AND (lock_at IS NULL OR lock_at <= $2)
                ORDER BY launch_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE tasks
            SET status = 'in_progress', lock_at = NOW()
            WHERE id IN (SELECT id FROM claimable)
            RETURNING *
            "#,
        )
        .bind(&statuses)
        .bind(lock_cutoff)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn create_task(&self, task: Task) -> anyhow::Result<()> {
        let middlewares_state = serde_json::to_vec(&task.middlewares_state)?;
        sqlx::query(
            r#"
            INSERT INTO tasks
                (id, custom_id, name, data, job_id, parent, kind, launch_at, status, lock_at, state, middlewares_state, error)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(task.id)
        .bind(&task.custom_id)
        .bind(&task.name)
        .bind(&task.data)
        .bind(&task.job_id)
        .bind(task.parent)
        .bind(kind_tag(&task.kind))
        .bind(task.launch_at)
        .bind(task_status_str(task.status))
        .bind(task.lock_at)
        .bind(&task.state)
        .bind(&middlewares_state)
        .bind(&task.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_state(&self, id: TaskId, state: Vec<u8>) -> anyhow::Result<()> {
        sqlx::query("UPDATE tasks SET state = $1 WHERE id = $2")
            .bind(&state)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release_task(&self, task: &Task) -> anyhow::Result<()> {
        sqlx::query("UPDATE tasks SET status = 'released', lock_at = NULL WHERE id = $1")
            .bind(task.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn wait_task_for_subtasks(&self, task: &Task) -> anyhow::Result<()> {
        let next = Utc::now() + chrono::Duration::from_std(self.task_wait_bounce)?;
        sqlx::query("UPDATE tasks SET status = 'waiting', launch_at = $1, lock_at = NULL WHERE id = $2")
            .bind(next)
            .bind(task.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail_task(&self, task: &Task, error: &anyhow::Error, timeout: Option<Duration>) -> anyhow::Result<()> {
        let error_text = format!("{error:#}");
        match timeout {
            Some(delay) => {
                let next = Utc::now() + chrono::Duration::from_std(delay)?;
                sqlx::query(
                    "UPDATE tasks SET status = 'failed', launch_at = $1, lock_at = NULL, error = $2 WHERE id = $3",
                )
                .bind(next)
                .bind(&error_text)
                .bind(task.id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "UPDATE tasks SET status = 'failed', launch_at = NULL, lock_at = NULL, error = $1 WHERE id = $2",
                )
                .bind(&error_text)
                .bind(task.id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn get_unreleased_task_children(&self, task: &Task) -> anyhow::Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE parent = $1 AND status <> 'released' LIMIT 1")
            .bind(task.id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn get_related_task(&self, task: &Task) -> anyhow::Result<Option<Task>> {
        let row = sqlx::query(
            "SELECT * FROM tasks WHERE name = $1 AND custom_id = $2 AND status <> 'released' AND id <> $3 LIMIT 1",
        )
        .bind(&task.name)
        .bind(&task.custom_id)
        .bind(task.id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn collect_metrics(&self) -> anyhow::Result<TaskMetricsSnapshot> {
        let row = sqlx::query("SELECT COUNT(*) AS unreleased FROM tasks WHERE status <> 'released'")
            .fetch_one(&self.pool)
            .await?;
        let unreleased: i64 = row.try_get("unreleased")?;
        Ok(TaskMetricsSnapshot {
            unreleased: unreleased.max(0) as u64,
        })
    }

    async fn find_next_job(&self, statuses: &[JobStatus]) -> anyhow::Result<Option<Job>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let lock_cutoff = Utc::now() - chrono::Duration::from_std(self.job_lease_window)?;

        let row = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT name
                FROM jobs
                WHERE status = ANY($1)
                  AND next_launch_at <= NOW()
                  AND (lock_at IS NULL OR lock_at <= $2)
                ORDER BY next_launch_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'in_progress', lock_at = NOW()
            WHERE name IN (SELECT name FROM claimable)
            RETURNING *
            "#,
        )
        .bind(&statuses)
        .bind(lock_cutoff)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn get_unreleased_job_children(&self, job_name: &str) -> anyhow::Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE job_id = $1 AND status <> 'released' LIMIT 1")
            .bind(job_name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn register_job(&self, cfg: &JobConfig, next_launch_at: DateTime<Utc>) -> anyhow::Result<()> {
        let (pattern, rrule_pattern) = cfg.schedule.to_stored();
        sqlx::query(
            r#"
            INSERT INTO jobs (name, status, pattern, rrule_pattern, next_launch_at, custom_id, lock_at, tags)
            VALUES ($1, 'released', $2, $3, $4, $5, NULL, $6)
            ON CONFLICT (name) DO UPDATE SET
                pattern = EXCLUDED.pattern,
                rrule_pattern = EXCLUDED.rrule_pattern,
                tags = EXCLUDED.tags
            "#,
        )
        .bind(&cfg.name)
        .bind(&pattern)
        .bind(&rrule_pattern)
        .bind(next_launch_at)
        .bind(&cfg.custom_id)
        .bind(&cfg.tags)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_job(&self, job: &Job, next_launch_at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query("UPDATE jobs SET status = 'released', next_launch_at = $1, lock_at = NULL WHERE name = $2")
            .bind(next_launch_at)
            .bind(&job.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn wait_job_for_subtasks(&self, job: &Job) -> anyhow::Result<()> {
        let next = Utc::now() + chrono::Duration::from_std(self.job_wait_bounce)?;
        sqlx::query("UPDATE jobs SET status = 'waiting', next_launch_at = $1, lock_at = NULL WHERE name = $2")
            .bind(next)
            .bind(&job.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

//! The persisted data model: [`Task`] and [`Job`], plus the lightweight
//! request types producers use to create them.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::Schedule;

pub type TaskId = Uuid;

/// Lifecycle state of a [`Task`]. `Released` is the only non-retry terminal
/// state; `Failed` is terminal only once `launch_at` has been cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    InProgress,
    Waiting,
    Failed,
    Released,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Failed => "failed",
            TaskStatus::Released => "released",
        }
    }
}

/// How a task was routed into existence. Promotes the original
/// implementation's `__subtask:`/`__job:` name-prefix encoding to an
/// explicit tagged variant (see REDESIGN FLAGS in SPEC_FULL.md) — `name`
/// still carries the handler-routing key, this just stops callers from
/// having to parse it back out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Created directly via `Publish`.
    Adhoc,
    /// Created by a handler's `create_subtask`; routes to the parent's
    /// thread-style `Subtask` handler unless it carries its own name.
    Subtask { parent: TaskId },
    /// Materializes one firing of a recurring job.
    JobFiring { job_name: String },
}

/// A unit of work, at whatever point it has reached in its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub custom_id: Option<String>,
    pub name: String,
    pub data: Vec<u8>,
    pub job_id: Option<String>,
    pub parent: Option<TaskId>,
    pub kind: TaskKind,
    pub launch_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub lock_at: Option<DateTime<Utc>>,
    pub state: Vec<u8>,
    pub middlewares_state: HashMap<String, Vec<u8>>,
    pub error: Option<String>,
}

impl Task {
    pub fn is_waiting(&self) -> bool {
        self.status == TaskStatus::Waiting
    }

    /// Name to look up in the handler registry, stripped of any routing
    /// encoding the store layer might still carry on the wire (kept for
    /// compatibility with adapters ported from the original's string-prefix
    /// scheme; fresh records never need it since `kind` already disambiguates).
    pub fn handler_name(&self) -> &str {
        self.name
            .strip_prefix("__subtask:")
            .unwrap_or(self.name.as_str())
    }
}

/// What a producer (or a handler, for subtasks) asks to have created.
#[derive(Debug, Clone, Default)]
pub struct CreateTaskRequest {
    pub name: String,
    pub data: Vec<u8>,
    pub custom_id: Option<String>,
    pub launch_after: Option<Duration>,
    pub launch_at: Option<DateTime<Utc>>,
}

impl CreateTaskRequest {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn with_custom_id(mut self, custom_id: impl Into<String>) -> Self {
        self.custom_id = Some(custom_id.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.launch_after = Some(delay);
        self
    }

    pub fn with_launch_at(mut self, at: DateTime<Utc>) -> Self {
        self.launch_at = Some(at);
        self
    }

    /// Resolve the effective `launch_at`, matching the original's
    /// precedence: an explicit instant wins, then a relative delay, then now.
    pub fn resolve_launch_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(at) = self.launch_at {
            return at;
        }
        if let Some(after) = self.launch_after {
            return now + after;
        }
        now
    }
}

/// Lifecycle state of a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    InProgress,
    Waiting,
    Released,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::InProgress => "in_progress",
            JobStatus::Waiting => "waiting",
            JobStatus::Released => "released",
        }
    }
}

/// A recurring schedule, as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub status: JobStatus,
    pub pattern: Option<String>,
    pub rrule_pattern: Option<String>,
    pub next_launch_at: DateTime<Utc>,
    pub custom_id: Option<String>,
    pub lock_at: Option<DateTime<Utc>>,
    /// Informational grouping only; never read by the engine. Kept from the
    /// original's `JobConfig.Tags` since dropping a harmless already-wired
    /// field would be an unannounced feature cut.
    pub tags: Vec<String>,
}

/// Registration-time configuration for a recurring job.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub name: String,
    pub schedule: Schedule,
    pub tags: Vec<String>,
    pub custom_id: Option<String>,
}

impl JobConfig {
    pub fn new(name: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            name: name.into(),
            schedule,
            tags: Vec::new(),
            custom_id: None,
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }
}

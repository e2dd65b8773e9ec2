//! The per-invocation handler context (spec.md §4.5), and the
//! [`HandlerOutcome`] record the dispatcher reads back once a handler
//! returns. The original's `taskContext` mutated shared `subtasks`/
//! `retryAfter` fields that the dispatcher inspected afterwards; per the
//! REDESIGN FLAGS this is split into an explicit outcome record instead,
//! so the context itself stays a thin read/write handle on the task.

use std::time::Duration;

use chrono::{DateTime, Utc};
use smallvec::SmallVec;
use tokio_util::sync::CancellationToken;

use crate::task::{CreateTaskRequest, Task};

/// A retry delay a handler or middleware wants applied to the next lease
/// attempt. `Terminal` is the `-1` sentinel from spec.md §4.2: `FailTask`
/// clears `launch_at`, making the failure permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAfter {
    Delay(Duration),
    Terminal,
}

/// What a handler invocation produced, besides an `Ok`/`Err`. Read by the
/// dispatcher after the handler (and every wrapping middleware) returns.
#[derive(Debug, Default)]
pub struct HandlerOutcome {
    pub subtasks: SmallVec<[CreateTaskRequest; 4]>,
    pub retry_after: Option<RetryAfter>,
}

/// Handed to every handler and middleware invocation.
pub struct TaskContext {
    task: Task,
    cancellation: CancellationToken,
    outcome: HandlerOutcome,
    state_write: Option<Vec<u8>>,
}

impl TaskContext {
    pub fn new(task: Task, cancellation: CancellationToken) -> Self {
        Self {
            task,
            cancellation,
            outcome: HandlerOutcome::default(),
            state_write: None,
        }
    }

    /// Immutable reference to the task being processed.
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Cooperative cancellation handle; handlers doing long-lived I/O
    /// should select against this alongside their own work.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Buffer a subtask-creation intent. Only realized by the dispatcher if
    /// the handler returns `Ok` (spec.md §4.2 step 5).
    pub fn create_subtask(&mut self, intent: CreateTaskRequest) {
        self.outcome.subtasks.push(intent);
    }

    /// Override the next retry delay. `Duration::ZERO` paired with
    /// `RetryAfter::Terminal` is how middleware signals "stop retrying".
    pub fn set_retry_after(&mut self, retry_after: RetryAfter) {
        self.outcome.retry_after = Some(retry_after);
    }

    /// Deserialize the task's persisted `state` into `target`. A no-op
    /// (leaves `target` untouched) if `state` is empty, matching the
    /// original's idempotent-on-empty behavior.
    pub fn bind_state<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<Option<T>> {
        if self.task.state.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&self.task.state)?))
    }

    /// Serialize and stage `value` as the task's new `state`. Persisted by
    /// the dispatcher immediately after the handler returns, via
    /// `Store::set_state` (kept out of the hot path inside the handler
    /// itself, unlike the original's synchronous `SetState` call, since the
    /// dispatcher already makes one post-handler store round trip).
    pub fn set_state<T: serde::Serialize>(&mut self, value: &T) -> anyhow::Result<()> {
        self.state_write = Some(serde_json::to_vec(value)?);
        Ok(())
    }

    /// Write a middleware's namespaced slot in `middlewares_state`. Callers
    /// must key this under something unlikely to collide (the reference
    /// retry middleware uses `"__retry"`, matching the original).
    pub fn set_middleware_state<T: serde::Serialize>(
        &mut self,
        key: &str,
        value: &T,
    ) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.task.middlewares_state.insert(key.to_string(), bytes);
        Ok(())
    }

    /// Consumes the context, returning the (possibly middleware-mutated)
    /// task, the handler outcome, and any staged `state` write for the
    /// dispatcher to persist.
    pub fn into_parts(self) -> (Task, HandlerOutcome, Option<Vec<u8>>) {
        (self.task, self.outcome, self.state_write)
    }
}

/// Intent created for a job's single per-firing task; distinct from
/// `CreateTaskRequest` only in that it carries no `custom_id`/delay knobs —
/// job firings always launch immediately (spec.md §4.4).
pub fn job_firing_launch_at(now: DateTime<Utc>) -> DateTime<Utc> {
    now
}

//! # taskloom-core
//!
//! A persistence-backed task and job orchestration engine: leasing,
//! subtask fan-out/join, recurring job scheduling, and middleware-wrapped
//! handler dispatch, all expressed against a narrow [`Store`] trait so any
//! backend capable of an atomic compare-and-set can drive it.
//!
//! ## Architecture
//!
//! ```text
//! Producer ──publish()──► Store ◄──find_next_task()── Dispatcher ──┐
//!                            ▲                                     │
//!                            │                         handler + middleware chain
//!                            │                                     │
//!                            └──────── release/fail/wait ──────────┘
//!
//! Store ◄──find_next_task([waiting])── Reaper ──► on_finish / release
//!
//! Store ◄──find_next_job()── JobScheduler (due loop) ──► materializes
//!                                                          a "__job:<name>"
//!                                                          task firing
//!
//! Store ◄──find_next_job([waiting])── JobScheduler (waiting loop)
//!                                      ──► on_finish, reschedule, release
//! ```
//!
//! ## Key invariants
//!
//! 1. Every status/lock transition the store performs must be atomic with
//!    its precondition check — two workers racing `find_next_task` must
//!    never both win the same task.
//! 2. At-least-once execution: a crashed worker's lease expires and the
//!    task is retried; handlers must be safe to invoke more than once for
//!    the same `custom_id`.
//! 3. A parent task or job never releases while it still has an
//!    unreleased child; the reaper/scheduler waiting loops are what drive
//!    that join.
//! 4. Middleware composes right-to-left: the first-registered middleware
//!    is outermost, seeing the task before and after everything beneath it.
//!
//! ## What this is not
//!
//! - Not a persistence backend itself — see `taskloom-postgres` and
//!   `taskloom-memory` for [`Store`] implementations.
//! - Not a metrics exporter — the bundled metrics middleware only keeps
//!   process-local counters; wiring them to Prometheus/OTel is left to the
//!   embedding application.
//! - Not a distributed consensus system — leasing assumes the store's
//!   compare-and-set is itself linearizable; taskloom coordinates around
//!   that guarantee, it doesn't provide one.

mod config;
mod context;
mod dispatcher;
mod error;
mod handler;
mod middleware;
mod middlewares;
mod reaper;
mod scheduler;
mod schedule;
mod service;
mod store;
mod task;

pub use config::EngineConfig;
pub use context::{HandlerOutcome, RetryAfter, TaskContext};
pub use error::{Categorizable, TaskloomError};
pub use handler::{Handler, HandlerBuilder, HandlerRegistration, HandlerRegistry, JobHandler};
pub use middleware::{compose, read_state, BoxFuture, MiddlewareFunc, MiddlewareHandler};
pub use middlewares::{logging_middleware, retry_middleware, MetricsMiddleware, MetricsSnapshot, RetryOptions};
pub use schedule::{every_day, every_hour, every_month, every_second, every_week, RecurrenceRule, Schedule};
pub use service::Taskloom;
pub use store::{Store, TaskMetricsSnapshot};
pub use task::{
    CreateTaskRequest, Job, JobConfig, JobStatus, Task, TaskId, TaskKind, TaskStatus,
};

#[cfg(test)]
mod engine_tests;

//! Engine-wide timing knobs (spec.md §6's "environment/configuration
//! knobs", SPEC_FULL.md §9/§11 resolution of the lease-threshold open
//! question). No config-file parsing crate is pulled in — this is a
//! programmatic-only surface, plain struct + `Default`.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a task lease is honored before another worker may steal it.
    pub task_lease_window: Duration,
    /// How long a job lease is honored before another worker may steal it.
    pub job_lease_window: Duration,
    /// Applied to a failed handler invocation that didn't call
    /// `set_retry_after` itself.
    pub default_retry_delay: Duration,
    /// Poll interval while the dispatcher/reaper last found no work.
    pub idle_poll_interval: Duration,
    /// Poll interval immediately after finding work (kept tight so a busy
    /// queue drains quickly).
    pub active_poll_interval: Duration,
    /// How far into the future `wait_task_for_subtasks` bounces `launch_at`
    /// before the reaper checks again.
    pub task_wait_bounce: Duration,
    /// Same, for jobs waiting on their firing's fan-out to drain.
    pub job_wait_bounce: Duration,
    /// Size of the bounded worker pool the dispatcher hands leased tasks to.
    pub worker_pool_size: usize,
    /// Period of the metrics-tick loop.
    pub metrics_tick_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_lease_window: Duration::from_secs(60),
            job_lease_window: Duration::from_secs(5 * 60),
            default_retry_delay: Duration::from_secs(10),
            idle_poll_interval: Duration::from_secs(1),
            active_poll_interval: Duration::from_millis(1),
            task_wait_bounce: Duration::from_secs(1),
            job_wait_bounce: Duration::from_secs(5),
            worker_pool_size: num_cpus(),
            metrics_tick_interval: Duration::from_secs(15),
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

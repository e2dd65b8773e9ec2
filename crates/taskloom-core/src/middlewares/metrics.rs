//! Process-local, lock-free task metrics, ported from
//! `middlewares/prometheus.go`. No exporter is wired up here — metrics
//! exporters are named-interface-only per spec.md §1 — this just keeps
//! counters and duration buckets the metrics-tick loop can log a snapshot
//! of.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::context::TaskContext;
use crate::middleware::{BoxFuture, MiddlewareFunc, MiddlewareHandler};

#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSnapshot {
    pub success_count: u64,
    pub failure_count: u64,
    pub total_duration: Duration,
}

#[derive(Default)]
struct Counters {
    success_count: AtomicU64,
    failure_count: AtomicU64,
    total_duration_micros: AtomicU64,
}

/// `(task_name, outcome) -> counters`, refreshed on every invocation.
#[derive(Clone, Default)]
pub struct MetricsMiddleware {
    counters: Arc<DashMap<String, Counters>>,
}

impl MetricsMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, task_name: &str) -> MetricsSnapshot {
        match self.counters.get(task_name) {
            Some(counters) => MetricsSnapshot {
                success_count: counters.success_count.load(Ordering::Relaxed),
                failure_count: counters.failure_count.load(Ordering::Relaxed),
                total_duration: Duration::from_micros(
                    counters.total_duration_micros.load(Ordering::Relaxed),
                ),
            },
            None => MetricsSnapshot::default(),
        }
    }

    pub fn middleware(&self) -> MiddlewareHandler {
        let counters = self.counters.clone();
        Arc::new(move |next: MiddlewareFunc| {
            let next = next.clone();
            let counters = counters.clone();
            let wrapped: MiddlewareFunc = Arc::new(
                move |ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
                    let next = next.clone();
                    let counters = counters.clone();
                    let name = ctx.task().name.clone();
                    Box::pin(async move {
                        let start = Instant::now();
                        let result = next(ctx).await;
                        let elapsed = start.elapsed();

                        let entry = counters.entry(name).or_default();
                        if result.is_ok() {
                            entry.success_count.fetch_add(1, Ordering::Relaxed);
                        } else {
                            entry.failure_count.fetch_add(1, Ordering::Relaxed);
                        }
                        entry
                            .total_duration_micros
                            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

                        result
                    })
                },
            );
            wrapped
        })
    }
}

//! Handler registry: maps a task or job name to the user-supplied handler
//! plus its optional finalizer, subtask handler, and handler-local
//! middleware (spec.md §4.5 handler-facing surface, §6's `TaskHandler`/
//! `RegisterJob`). Per the REDESIGN FLAGS, the original's chainable
//! `HandlerStruct` interface (a trait object with interior mutability)
//! becomes a builder over a shared, concurrent registry: each chained call
//! commits directly into the registry's entry, the way the original's
//! pointer-aliased `handlerStruct` let later chained calls mutate the same
//! record the map already held.

use std::sync::Arc;

use dashmap::DashMap;

use crate::context::TaskContext;
use crate::middleware::{BoxFuture, MiddlewareHandler};
use crate::task::JobConfig;

pub type Handler =
    Arc<dyn for<'a> Fn(&'a mut TaskContext) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync>;

pub type JobHandler =
    Arc<dyn for<'a> Fn(&'a mut TaskContext) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync>;

/// The record held by the registry for a given name.
#[derive(Clone)]
pub struct HandlerRegistration {
    pub name: String,
    pub handler: Option<Handler>,
    pub job_handler: Option<JobHandler>,
    pub job_config: Option<JobConfig>,
    pub on_finish: Option<Handler>,
    pub on_subtask: Option<Handler>,
    pub middlewares: Vec<MiddlewareHandler>,
    pub depend_on_custom_id: bool,
}

impl HandlerRegistration {
    fn new_task(name: String, handler: Handler) -> Self {
        Self {
            name,
            handler: Some(handler),
            job_handler: None,
            job_config: None,
            on_finish: None,
            on_subtask: None,
            middlewares: Vec::new(),
            depend_on_custom_id: false,
        }
    }

    fn new_job(cfg: JobConfig, handler: JobHandler) -> Self {
        Self {
            name: cfg.name.clone(),
            handler: None,
            job_handler: Some(handler),
            job_config: Some(cfg),
            on_finish: None,
            on_subtask: None,
            middlewares: Vec::new(),
            depend_on_custom_id: false,
        }
    }
}

/// Concurrent map from task/job name to its registration. Shared by the
/// service façade and the dispatcher/reaper/scheduler loops.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    entries: Arc<DashMap<String, HandlerRegistration>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<HandlerRegistration> {
        self.entries.get(name).map(|r| r.clone())
    }

    pub fn register_task(&self, name: impl Into<String>, handler: Handler) -> HandlerBuilder {
        let name = name.into();
        self.entries
            .insert(name.clone(), HandlerRegistration::new_task(name.clone(), handler));
        HandlerBuilder {
            registry: self.clone(),
            name,
        }
    }

    pub fn register_job(&self, cfg: JobConfig, handler: JobHandler) -> HandlerBuilder {
        let name = cfg.name.clone();
        self.entries
            .insert(name.clone(), HandlerRegistration::new_job(cfg, handler));
        HandlerBuilder {
            registry: self.clone(),
            name,
        }
    }

    pub fn job_configs(&self) -> Vec<JobConfig> {
        self.entries
            .iter()
            .filter_map(|e| e.job_config.clone())
            .collect()
    }
}

/// Returned by `HandlerRegistry::register_task`/`register_job`; each
/// chained call commits straight back into the registry entry it was
/// created from.
pub struct HandlerBuilder {
    registry: HandlerRegistry,
    name: String,
}

impl HandlerBuilder {
    fn with_entry(self, f: impl FnOnce(&mut HandlerRegistration)) -> Self {
        if let Some(mut entry) = self.registry.entries.get_mut(&self.name) {
            f(&mut entry);
        }
        self
    }

    /// Invoked once every child of this task/job firing has released.
    pub fn on_finish(self, handler: Handler) -> Self {
        self.with_entry(|entry| entry.on_finish = Some(handler))
    }

    /// Invoked for thread-style subtasks (an intent with an empty name).
    pub fn subtask(self, handler: Handler) -> Self {
        self.with_entry(|entry| entry.on_subtask = Some(handler))
    }

    /// Handler-local middleware, composed inside the service-level chain.
    pub fn use_middleware(self, middlewares: impl IntoIterator<Item = MiddlewareHandler>) -> Self {
        let middlewares: Vec<_> = middlewares.into_iter().collect();
        self.with_entry(|entry| entry.middlewares = middlewares)
    }

    /// Gate dispatch on a related (same name + custom_id, non-released)
    /// task existing; see spec.md §9 Open Questions for the no-related-task
    /// behavior.
    pub fn depend_on_custom_id(self) -> Self {
        self.with_entry(|entry| entry.depend_on_custom_id = true)
    }
}

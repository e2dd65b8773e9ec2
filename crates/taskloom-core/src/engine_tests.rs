//! Integration-style tests exercising the engine end to end against
//! `taskloom-memory`, ported from the original's `tests/run.go` scenarios
//! (simple publish, fan-out/join, thread-style subtasks, failure/retry) plus
//! three this implementation adds: lease recovery, a recurring job, and
//! `retry_middleware` exhaustion reaching a terminal failure.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskloom_memory::MemoryStore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::TaskContext;
use crate::handler::Handler;
use crate::middleware::BoxFuture;
use crate::middlewares::{retry_middleware, RetryOptions};
use crate::schedule::Schedule;
use crate::service::Taskloom;
use crate::store::Store;
use crate::task::{CreateTaskRequest, JobConfig, Task, TaskKind, TaskStatus};

/// Polls `condition` until it's true or `timeout` elapses, panicking with
/// `message` on timeout. Tests below are timing-sensitive by nature (the
/// engine is a set of polling loops); this keeps them from flaking on a
/// slow CI box while still failing fast on genuine regressions.
async fn wait_until(timeout: Duration, message: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("{message}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn collector() -> (Arc<Mutex<Vec<String>>>, Handler) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = seen.clone();
    let handler: Handler = Arc::new(move |ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
        let captured = captured.clone();
        Box::pin(async move {
            let message = String::from_utf8_lossy(&ctx.task().data).to_string();
            captured.lock().unwrap().push(message);
            Ok(())
        })
    });
    (seen, handler)
}

#[tokio::test]
async fn simple_publish_is_released_after_the_handler_runs() {
    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(Taskloom::new(store.clone()));

    let name = Uuid::new_v4().to_string();
    let (seen, handler) = collector();
    service.task_handler(name.as_str(), handler);

    let cancellation = CancellationToken::new();
    let listener = tokio::spawn(service.clone().listen(cancellation.clone()));

    let id = service
        .publish(CreateTaskRequest::new(name.clone(), b"simple publish".to_vec()))
        .await
        .unwrap();

    wait_until(Duration::from_secs(2), "handler never ran", || {
        seen.lock().unwrap().len() == 1
    })
    .await;
    assert_eq!(seen.lock().unwrap()[0], "simple publish");

    wait_until(Duration::from_secs(2), "task was never released", || {
        store
            .dump_tasks()
            .into_iter()
            .any(|t| t.id == id && t.status == TaskStatus::Released)
    })
    .await;

    cancellation.cancel();
    listener.await.unwrap().unwrap();
}

#[tokio::test]
async fn fan_out_subtasks_join_before_the_finalizer_runs() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let service = Arc::new(Taskloom::new(store.clone()));

    let parent_name = Uuid::new_v4().to_string();
    let subtask_name = Uuid::new_v4().to_string();

    let (subtask_seen, subtask_handler) = collector();
    service.task_handler(subtask_name.as_str(), subtask_handler);

    let finished = Arc::new(Mutex::new(false));
    let finished_flag = finished.clone();
    let subtask_name_for_parent = subtask_name.clone();
    service
        .task_handler(
            parent_name.as_str(),
            Arc::new(move |ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
                let subtask_name = subtask_name_for_parent.clone();
                Box::pin(async move {
                    for i in 0..3 {
                        ctx.create_subtask(CreateTaskRequest::new(subtask_name.clone(), i.to_string().into_bytes()));
                    }
                    Ok(())
                })
            }),
        )
        .on_finish(Arc::new(move |_ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
            let finished_flag = finished_flag.clone();
            Box::pin(async move {
                *finished_flag.lock().unwrap() = true;
                Ok(())
            })
        }));

    let cancellation = CancellationToken::new();
    let listener = tokio::spawn(service.clone().listen(cancellation.clone()));

    service.publish(CreateTaskRequest::new(parent_name, Vec::new())).await.unwrap();

    wait_until(Duration::from_secs(3), "not all subtasks ran", || {
        subtask_seen.lock().unwrap().len() == 3
    })
    .await;

    let mut seen = subtask_seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["0", "1", "2"]);

    wait_until(Duration::from_secs(3), "finalizer never ran", || *finished.lock().unwrap()).await;

    cancellation.cancel();
    listener.await.unwrap().unwrap();
}

#[tokio::test]
async fn thread_style_subtasks_route_to_the_subtask_handler() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let service = Arc::new(Taskloom::new(store));

    let parent_name = Uuid::new_v4().to_string();
    let (subtask_seen, subtask_handler) = collector();

    service
        .task_handler(
            parent_name.as_str(),
            Arc::new(|ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
                Box::pin(async move {
                    for i in 0..3 {
                        ctx.create_subtask(CreateTaskRequest::new("", i.to_string().into_bytes()));
                    }
                    Ok(())
                })
            }),
        )
        .subtask(subtask_handler);

    let cancellation = CancellationToken::new();
    let listener = tokio::spawn(service.clone().listen(cancellation.clone()));

    service.publish(CreateTaskRequest::new(parent_name, Vec::new())).await.unwrap();

    wait_until(Duration::from_secs(3), "not all thread subtasks ran", || {
        subtask_seen.lock().unwrap().len() == 3
    })
    .await;

    let mut seen = subtask_seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["0", "1", "2"]);

    cancellation.cancel();
    listener.await.unwrap().unwrap();
}

#[tokio::test]
async fn a_failing_task_is_retried_without_a_middleware_installed() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let service = Arc::new(Taskloom::with_config(
        store.clone(),
        crate::config::EngineConfig {
            default_retry_delay: Duration::from_millis(50),
            ..Default::default()
        },
    ));

    let name = Uuid::new_v4().to_string();
    let attempts = Arc::new(Mutex::new(0));
    let counted = attempts.clone();
    service.task_handler(
        name.as_str(),
        Arc::new(move |_ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
            let counted = counted.clone();
            Box::pin(async move {
                *counted.lock().unwrap() += 1;
                anyhow::bail!("always return error")
            })
        }),
    );

    let cancellation = CancellationToken::new();
    let listener = tokio::spawn(service.clone().listen(cancellation.clone()));

    service.publish(CreateTaskRequest::new(name, Vec::new())).await.unwrap();

    wait_until(Duration::from_secs(3), "task was not retried at least twice", || {
        *attempts.lock().unwrap() >= 2
    })
    .await;

    cancellation.cancel();
    listener.await.unwrap().unwrap();
}

#[tokio::test]
async fn retry_middleware_exhausts_and_leaves_the_task_permanently_failed() {
    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(Taskloom::new(store.clone()));

    service.use_middleware(retry_middleware(RetryOptions {
        max_retries: 3,
        interval: Duration::from_millis(20),
    }));

    let name = Uuid::new_v4().to_string();
    let attempts = Arc::new(Mutex::new(0));
    let counted = attempts.clone();
    service.task_handler(
        name.as_str(),
        Arc::new(move |_ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
            let counted = counted.clone();
            Box::pin(async move {
                *counted.lock().unwrap() += 1;
                anyhow::bail!("always return error")
            })
        }),
    );

    let cancellation = CancellationToken::new();
    let listener = tokio::spawn(service.clone().listen(cancellation.clone()));

    let id = service.publish(CreateTaskRequest::new(name, Vec::new())).await.unwrap();

    wait_until(Duration::from_secs(3), "task never reached a terminal failed state", || {
        store.dump_tasks().into_iter().any(|t| {
            t.id == id && t.status == TaskStatus::Failed && t.launch_at == chrono::DateTime::<chrono::Utc>::MAX_UTC
        })
    })
    .await;

    assert_eq!(*attempts.lock().unwrap(), 3);

    cancellation.cancel();
    listener.await.unwrap().unwrap();
}

#[tokio::test]
async fn an_in_progress_task_past_its_lease_window_is_reclaimed() {
    let store = MemoryStore::new();

    let task = Task {
        id: Uuid::new_v4(),
        custom_id: None,
        name: "stuck".to_string(),
        data: Vec::new(),
        job_id: None,
        parent: None,
        kind: TaskKind::Adhoc,
        launch_at: chrono::Utc::now() - chrono::Duration::seconds(1),
        status: TaskStatus::InProgress,
        lock_at: Some(chrono::Utc::now() - chrono::Duration::seconds(120)),
        state: Vec::new(),
        middlewares_state: Default::default(),
        error: None,
    };
    store.create_task(task.clone()).await.unwrap();

    let reclaimed = store
        .find_next_task(&[TaskStatus::Created, TaskStatus::InProgress, TaskStatus::Failed])
        .await
        .unwrap();

    assert_eq!(reclaimed.unwrap().id, task.id);
}

#[tokio::test]
async fn a_recurring_job_fires_and_fans_out_subtasks() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let service = Arc::new(Taskloom::new(store));

    let job_name = Uuid::new_v4().to_string();
    let subtask_name = Uuid::new_v4().to_string();

    let (subtask_seen, subtask_handler) = collector();
    service.task_handler(subtask_name.as_str(), subtask_handler);

    let subtask_name_for_job = subtask_name.clone();
    service.register_job(
        JobConfig::new(job_name, Schedule::from_cron_pattern("@every 1s").unwrap()),
        Arc::new(move |ctx: &mut TaskContext| -> BoxFuture<'_, anyhow::Result<()>> {
            let subtask_name = subtask_name_for_job.clone();
            Box::pin(async move {
                ctx.create_subtask(CreateTaskRequest::new(subtask_name, b"tick".to_vec()));
                Ok(())
            })
        }),
    );

    let cancellation = CancellationToken::new();
    let listener = tokio::spawn(service.clone().listen(cancellation.clone()));

    wait_until(Duration::from_secs(5), "job never fired", || !subtask_seen.lock().unwrap().is_empty()).await;

    cancellation.cancel();
    listener.await.unwrap().unwrap();
}

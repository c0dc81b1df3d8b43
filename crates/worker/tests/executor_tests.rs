mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use riberry_core::TaskMessage;
use riberry_domain::*;
use riberry_worker::{
    flow, task_fn, ExecutorSettings, Fallback, RetryLimit, TaskError, TaskOptions, TaskOutcome,
    TaskRegistry,
};
use serde_json::{json, Value};

fn ok(value: Value) -> Arc<dyn riberry_worker::TaskHandler> {
    task_fn(move |_| {
        let value = value.clone();
        Box::pin(async move { Ok(value) })
    })
}

fn raising(error_type: &'static str) -> Arc<dyn riberry_worker::TaskHandler> {
    task_fn(move |_| Box::pin(async move { Err(TaskError::raised(error_type, "boom")) }))
}

async fn artifact_categories(fixture: &Fixture, root_id: &str) -> Vec<String> {
    fixture
        .pending_events()
        .await
        .into_iter()
        .filter(|e| e.root_id == root_id && e.name == event_names::ARTIFACT)
        .filter_map(|e| serde_json::from_value::<ArtifactEventData>(e.data).ok())
        .filter_map(|data| data.category)
        .collect()
}

#[tokio::test]
async fn test_stream_runs_from_start_to_end() {
    let fixture = Fixture::new().await;
    let (execution, root_id) = fixture.active_execution().await;

    let mut tasks = TaskRegistry::new();
    tasks.register("extract", ok(json!(1)), TaskOptions::default()).unwrap();
    tasks.register("load", ok(json!(2)), TaskOptions::default()).unwrap();
    let executor = fixture.executor(tasks);

    let first = flow::start("extract", json!({}), "Billing")
        .unwrap()
        .with_root(root_id.clone())
        .on_success(flow::end("load", json!({}), "Billing").unwrap());
    assert_eq!(
        executor.execute(first).await,
        TaskOutcome::Succeeded(json!(1))
    );

    let outcomes = fixture.drain(&executor).await;
    assert_eq!(
        outcomes,
        vec![("load".to_string(), TaskOutcome::Succeeded(json!(2)))]
    );

    let states = fixture.stream_states(&root_id, "Billing").await;
    assert_eq!(
        states,
        vec![StreamStatus::Active, StreamStatus::Queued, StreamStatus::Success]
    );
    assert_eq!(
        fixture.reload(&execution).await.status,
        ExecutionStatus::Active
    );
}

#[tokio::test]
async fn test_stream_events_are_emitted_once_per_state() {
    let fixture = Fixture::new().await;
    let (_, root_id) = fixture.active_execution().await;

    let mut tasks = TaskRegistry::new();
    tasks.register("extract", ok(json!(1)), TaskOptions::default()).unwrap();
    let executor = fixture.executor(tasks);

    for _ in 0..2 {
        let message = flow::start("extract", json!({}), "Billing")
            .unwrap()
            .with_root(root_id.clone());
        executor.execute(message).await;
    }

    let states = fixture.stream_states(&root_id, "Billing").await;
    assert_eq!(states, vec![StreamStatus::Active]);
}

#[tokio::test]
async fn test_retry_then_failure_marks_execution_failed() {
    let fixture = Fixture::new().await;
    let (execution, root_id) = fixture.active_execution().await;

    let mut tasks = TaskRegistry::new();
    tasks
        .register(
            "fetch",
            raising("IOError"),
            TaskOptions::default()
                .retry_for("IOError")
                .max_retries(RetryLimit::Limited(1)),
        )
        .unwrap();
    let executor = fixture.executor_with(tasks, None, fast_settings());

    let message = TaskMessage::new("fetch", json!({}))
        .with_root(root_id.clone())
        .on_failure(TaskMessage::new("cleanup", json!({})));
    let outcome = executor.execute(message).await;
    assert!(matches!(outcome, TaskOutcome::Retried { retries: 1, .. }));
    assert_eq!(
        fixture.reload(&execution).await.status,
        ExecutionStatus::Active
    );

    let retried = fixture.next_message().await.unwrap();
    assert_eq!(retried.task_name, "fetch");
    assert_eq!(retried.retries, 1);

    let outcome = executor.execute(retried).await;
    assert_eq!(
        outcome,
        TaskOutcome::Failed {
            error_type: "IOError".into(),
            message: "boom".into()
        }
    );
    assert_eq!(
        fixture.reload(&execution).await.status,
        ExecutionStatus::Failure
    );

    let callback = fixture.next_message().await.unwrap();
    assert_eq!(callback.task_name, "cleanup");
    assert_eq!(callback.root_id, root_id);
    assert_eq!(artifact_categories(&fixture, &root_id).await, vec!["Fatal"]);
}

#[tokio::test]
async fn test_non_retry_error_is_not_retried() {
    let fixture = Fixture::new().await;
    let (execution, root_id) = fixture.active_execution().await;

    let mut tasks = TaskRegistry::new();
    tasks
        .register(
            "fetch",
            raising("ValueError"),
            TaskOptions::default().retry_for("IOError"),
        )
        .unwrap();
    let executor = fixture.executor_with(tasks, None, fast_settings());

    let outcome = executor
        .execute(TaskMessage::new("fetch", json!({})).with_root(root_id))
        .await;
    assert!(matches!(outcome, TaskOutcome::Failed { .. }));
    assert_eq!(
        fixture.reload(&execution).await.status,
        ExecutionStatus::Failure
    );
    assert!(fixture.next_message().await.is_none());
}

#[tokio::test]
async fn test_fallback_value_intercepts_failure() {
    let fixture = Fixture::new().await;
    let (execution, root_id) = fixture.active_execution().await;

    let mut tasks = TaskRegistry::new();
    tasks
        .register(
            "fetch",
            raising("ValueError"),
            TaskOptions::default().fallback(Fallback::Value(json!("cached"))),
        )
        .unwrap();
    let executor = fixture.executor(tasks);

    let message = TaskMessage::new("fetch", json!({}))
        .with_root(root_id.clone())
        .on_success(TaskMessage::new("next", json!({})));
    assert_eq!(
        executor.execute(message).await,
        TaskOutcome::Intercepted(json!("cached"))
    );

    assert_eq!(
        fixture.reload(&execution).await.status,
        ExecutionStatus::Active
    );
    assert_eq!(fixture.next_message().await.unwrap().task_name, "next");
    assert_eq!(
        artifact_categories(&fixture, &root_id).await,
        vec!["Intercepted"]
    );
}

#[tokio::test]
async fn test_failing_fallback_is_fatal() {
    let fixture = Fixture::new().await;
    let (execution, root_id) = fixture.active_execution().await;

    let mut tasks = TaskRegistry::new();
    tasks
        .register(
            "fetch",
            raising("ValueError"),
            TaskOptions::default().fallback(Fallback::Compute(Arc::new(
                || -> Result<Value, String> { Err("no cached value".to_string()) },
            ))),
        )
        .unwrap();
    let executor = fixture.executor(tasks);

    let outcome = executor
        .execute(TaskMessage::new("fetch", json!({})).with_root(root_id.clone()))
        .await;
    assert!(matches!(outcome, TaskOutcome::Failed { .. }));
    assert_eq!(
        fixture.reload(&execution).await.status,
        ExecutionStatus::Failure
    );
    assert_eq!(
        artifact_categories(&fixture, &root_id).await,
        vec!["Fatal (intercept failed)"]
    );
}

#[tokio::test]
async fn test_time_limit_never_falls_back() {
    let fixture = Fixture::new().await;
    let (execution, root_id) = fixture.active_execution().await;

    let mut tasks = TaskRegistry::new();
    tasks
        .register(
            "slow",
            task_fn(|_| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Value::Null)
                })
            }),
            TaskOptions::default()
                .max_retries(RetryLimit::Limited(0))
                .fallback(Fallback::Value(json!("cached"))),
        )
        .unwrap();
    let settings = ExecutorSettings {
        soft_time_limit: Some(Duration::from_millis(20)),
        ..fast_settings()
    };
    let executor = fixture.executor_with(tasks, None, settings);

    let outcome = executor
        .execute(TaskMessage::new("slow", json!({})).with_root(root_id.clone()))
        .await;
    match outcome {
        TaskOutcome::Failed { error_type, .. } => {
            assert_eq!(error_type, "SoftTimeLimitExceeded")
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(
        fixture.reload(&execution).await.status,
        ExecutionStatus::Failure
    );
    assert_eq!(artifact_categories(&fixture, &root_id).await, vec!["Fatal"]);
}

#[tokio::test]
async fn test_time_limit_is_fatal_with_default_options() {
    let fixture = Fixture::new().await;
    let (execution, root_id) = fixture.active_execution().await;

    let mut tasks = TaskRegistry::new();
    tasks
        .register(
            "slow",
            task_fn(|_| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Value::Null)
                })
            }),
            TaskOptions::default().fallback(Fallback::Value(json!("cached"))),
        )
        .unwrap();
    let settings = ExecutorSettings {
        soft_time_limit: Some(Duration::from_millis(20)),
        ..fast_settings()
    };
    let executor = fixture.executor_with(tasks, None, settings);

    let outcome = executor
        .execute(TaskMessage::new("slow", json!({})).with_root(root_id.clone()))
        .await;
    assert!(matches!(outcome, TaskOutcome::Failed { .. }));
    assert!(fixture.next_message().await.is_none());
    assert_eq!(
        fixture.reload(&execution).await.status,
        ExecutionStatus::Failure
    );
    assert_eq!(artifact_categories(&fixture, &root_id).await, vec!["Fatal"]);
}

#[tokio::test]
async fn test_time_limit_retries_when_listed() {
    let fixture = Fixture::new().await;
    let (execution, root_id) = fixture.active_execution().await;

    let mut tasks = TaskRegistry::new();
    tasks
        .register(
            "slow",
            task_fn(|_| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Value::Null)
                })
            }),
            TaskOptions::default().retry_for("SoftTimeLimitExceeded"),
        )
        .unwrap();
    let settings = ExecutorSettings {
        soft_time_limit: Some(Duration::from_millis(20)),
        ..fast_settings()
    };
    let executor = fixture.executor_with(tasks, None, settings);

    let outcome = executor
        .execute(TaskMessage::new("slow", json!({})).with_root(root_id))
        .await;
    assert!(matches!(outcome, TaskOutcome::Retried { retries: 1, .. }));
    assert_eq!(fixture.next_message().await.unwrap().task_name, "slow");
    assert_eq!(
        fixture.reload(&execution).await.status,
        ExecutionStatus::Active
    );
}

#[tokio::test]
async fn test_terminal_execution_refuses_task() {
    let fixture = Fixture::new().await;
    let (_, root_id) = fixture.active_execution().await;
    fixture
        .lifecycle()
        .execution_complete(&root_id, ExecutionStatus::Success, None)
        .await
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut tasks = TaskRegistry::new();
    tasks
        .register(
            "fetch",
            task_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok(Value::Null) })
            }),
            TaskOptions::default(),
        )
        .unwrap();
    let executor = fixture.executor(tasks);

    let message = TaskMessage::new("fetch", json!({}))
        .with_root(root_id)
        .on_failure(TaskMessage::new("cleanup", json!({})));
    assert_eq!(executor.execute(message).await, TaskOutcome::Refused);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.next_message().await.unwrap().task_name, "cleanup");
}

#[tokio::test]
async fn test_ignored_task_publishes_nothing() {
    let fixture = Fixture::new().await;
    let (execution, root_id) = fixture.active_execution().await;

    let mut tasks = TaskRegistry::new();
    tasks
        .register(
            "skip",
            task_fn(|_| Box::pin(async { Err(TaskError::Ignore) })),
            TaskOptions::default(),
        )
        .unwrap();
    let executor = fixture.executor(tasks);

    let message = TaskMessage::new("skip", json!({}))
        .with_root(root_id)
        .on_success(TaskMessage::new("next", json!({})))
        .on_failure(TaskMessage::new("cleanup", json!({})));
    assert_eq!(executor.execute(message).await, TaskOutcome::Ignored);
    assert!(fixture.next_message().await.is_none());
    assert_eq!(
        fixture.reload(&execution).await.status,
        ExecutionStatus::Active
    );
}

#[tokio::test]
async fn test_unregistered_task_is_dropped() {
    let fixture = Fixture::new().await;
    let executor = fixture.executor(TaskRegistry::new());
    assert_eq!(
        executor.execute(TaskMessage::new("missing", json!({}))).await,
        TaskOutcome::Unregistered
    );
}

#[tokio::test]
async fn test_replace_chains_original_callbacks() {
    let fixture = Fixture::new().await;
    let (_, root_id) = fixture.active_execution().await;

    let mut tasks = TaskRegistry::new();
    tasks
        .register(
            "plan",
            task_fn(|ctx| {
                Box::pin(async move {
                    ctx.replace(vec![
                        TaskMessage::new("part_a", json!({})),
                        TaskMessage::new("part_b", json!({})),
                    ])
                    .await?;
                    Ok(Value::Null)
                })
            }),
            TaskOptions::default(),
        )
        .unwrap();
    let executor = fixture.executor(tasks);

    let message = TaskMessage::new("plan", json!({}))
        .with_root(root_id.clone())
        .on_success(TaskMessage::new("report", json!({})));
    executor.execute(message).await;

    let head = fixture.next_message().await.unwrap();
    assert_eq!(head.task_name, "part_a");
    assert_eq!(head.root_id, root_id);
    assert_eq!(head.link.len(), 1);
    assert_eq!(head.link[0].task_name, "part_b");
    assert_eq!(head.link[0].link[0].task_name, "report");
    assert!(fixture.next_message().await.is_none());
}

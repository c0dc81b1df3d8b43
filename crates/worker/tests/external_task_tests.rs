mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use riberry_worker::builtin::register_builtin_tasks;
use riberry_worker::{
    handler_fn, ConsumerControl, EventRegistry, ExternalTaskReceiver, ExternalTasks,
    HandlerOutcome, NewExternalTask, RegistryEvent, TaskOutcome, TaskRegistry, WorkerPool,
};
use riberry_domain::ExternalTaskStatus;
use serde_json::{json, Value};

/// 第一次收到的结果要求重新等待，之后全部通过
fn approve_on_second_attempt(calls: Arc<AtomicUsize>) -> EventRegistry {
    let mut registry = EventRegistry::new();
    registry
        .external_result_received(
            "approve",
            handler_fn(move |event| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    let RegistryEvent::ExternalResult { task, .. } = event else {
                        return Ok(HandlerOutcome::Done);
                    };
                    if attempt == 0 {
                        Ok(HandlerOutcome::Retry {
                            input_data: Some(json!({"reason": "rejected", "task": task.name})),
                        })
                    } else {
                        Ok(HandlerOutcome::Done)
                    }
                })
            }),
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn test_external_result_is_validated_before_completion() {
    let fixture = Fixture::new().await;
    let (execution, root_id) = fixture.active_execution().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let events = Arc::new(approve_on_second_attempt(calls.clone()));
    let mut tasks = TaskRegistry::new();
    register_builtin_tasks(&mut tasks, Arc::new(BTreeMap::new()), events, None).unwrap();
    let executor = fixture.executor(tasks);

    let external = ExternalTasks::new(fixture.repos.clone());
    let created = external
        .create(
            &execution,
            NewExternalTask::default()
                .with_id("ext-1")
                .with_input(json!({"question": "approve?"})),
        )
        .await
        .unwrap();
    assert_eq!(created.name, "ext-1");
    assert_eq!(created.task_type, "external");
    assert_eq!(created.status, ExternalTaskStatus::Waiting);

    let check = || ExternalTasks::receiver_message("ext-1", Some("approve")).with_root(root_id.clone());

    let outcome = executor.execute(check()).await;
    assert_eq!(
        outcome,
        TaskOutcome::Retried {
            retries: 1,
            countdown: Duration::from_secs(1)
        }
    );

    external
        .mark_as_ready("ext-1", json!({"approved": false}))
        .await
        .unwrap();
    let outcome = executor.execute(check()).await;
    assert!(matches!(outcome, TaskOutcome::Retried { .. }));
    let waiting = external.find("ext-1").await.unwrap().unwrap();
    assert_eq!(waiting.status, ExternalTaskStatus::Waiting);
    assert_eq!(waiting.input_data.unwrap()["reason"], "rejected");

    external
        .mark_as_ready("ext-1", json!({"approved": true}))
        .await
        .unwrap();
    let outcome = executor.execute(check()).await;
    assert_eq!(outcome, TaskOutcome::Succeeded(json!({"approved": true})));
    assert_eq!(
        external.find("ext-1").await.unwrap().unwrap().status,
        ExternalTaskStatus::Complete
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let outcome = executor.execute(check()).await;
    assert_eq!(outcome, TaskOutcome::Succeeded(json!({"approved": true})));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_missing_external_task_returns_null() {
    let fixture = Fixture::new().await;
    let mut tasks = TaskRegistry::new();
    register_builtin_tasks(
        &mut tasks,
        Arc::new(BTreeMap::new()),
        Arc::new(EventRegistry::new()),
        None,
    )
    .unwrap();
    let executor = fixture.executor(tasks);

    let outcome = executor
        .execute(ExternalTasks::receiver_message("missing", None))
        .await;
    assert_eq!(outcome, TaskOutcome::Succeeded(Value::Null));
}

#[tokio::test]
async fn test_mark_unknown_task_as_ready_fails() {
    let fixture = Fixture::new().await;
    let external = ExternalTasks::new(fixture.repos.clone());
    let err = external
        .mark_as_ready("missing", json!({}))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_receiver_subscribes_only_while_results_are_pending() {
    let fixture = Fixture::new().await;
    let (execution, _) = fixture.active_execution().await;

    let executor = Arc::new(fixture.executor(TaskRegistry::new()));
    let pool = Arc::new(WorkerPool::new(
        executor,
        fixture.infra.transport.clone(),
        vec![DEFAULT_QUEUE.to_string()],
        1,
        1,
    ));
    let receiver = ExternalTaskReceiver::new(
        fixture.repos.clone(),
        INSTANCE,
        "rib.external",
        pool.clone(),
    );

    assert!(!receiver.check_once().await.unwrap());
    assert_eq!(pool.queues().await, vec![DEFAULT_QUEUE.to_string()]);

    let external = ExternalTasks::new(fixture.repos.clone());
    external
        .create(&execution, NewExternalTask::default().with_id("ext-1"))
        .await
        .unwrap();
    assert!(!receiver.check_once().await.unwrap());

    external.mark_as_ready("ext-1", json!({})).await.unwrap();
    assert!(receiver.check_once().await.unwrap());
    assert!(pool.queues().await.contains(&"rib.external".to_string()));

    fixture
        .repos
        .external_tasks
        .transition(
            "ext-1",
            ExternalTaskStatus::Ready,
            ExternalTaskStatus::Complete,
            None,
            None,
        )
        .await
        .unwrap();
    assert!(!receiver.check_once().await.unwrap());
    assert_eq!(pool.queues().await, vec![DEFAULT_QUEUE.to_string()]);
}

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use riberry_core::{AppConfig, RiberryError};
use riberry_domain::ExecutionStatus;
use riberry_worker::{
    handler_fn, task_fn, HandlerOutcome, RiberryApp, Worker, WorkerBuilder,
};
use serde_json::json;

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.instance = Some(INSTANCE.to_string());
    config.background.capacity_distributor_enabled = false;
    config
}

fn app(succeeded: Arc<AtomicUsize>) -> RiberryApp {
    let mut app = RiberryApp::new("reports");
    app.entry_point(
        ENTRY_POINT,
        PRIMARY_STREAM,
        task_fn(|ctx| {
            Box::pin(async move {
                let data = ctx.data().await?;
                data.update("summary", |_| json!({"rows": 12})).await?;
                Ok(json!("done"))
            })
        }),
    )
    .unwrap();
    app.events_mut()
        .execution_succeeded(handler_fn(move |_| {
            succeeded.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(HandlerOutcome::Done) })
        }))
        .unwrap();
    app
}

fn worker(fixture: &Fixture, config: AppConfig, succeeded: Arc<AtomicUsize>) -> Worker {
    WorkerBuilder::new(config, fixture.infra.clone(), app(succeeded))
        .worker_uuid("worker-a")
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_execution_runs_from_dispatch_to_completion() {
    let fixture = Fixture::new().await;
    let execution = fixture.execution().await;
    let succeeded = Arc::new(AtomicUsize::new(0));
    let worker = worker(&fixture, config(), succeeded.clone());

    assert_eq!(worker.loops().tick_once().await, 2);
    let ready = fixture.reload(&execution).await;
    assert_eq!(ready.status, ExecutionStatus::Ready);
    let root_id = ready.task_id.clone().unwrap();

    assert_eq!(worker.pool().poll_once().await.unwrap(), 1);
    assert!(worker.pool().wait_idle(Duration::from_secs(5)).await);
    assert_eq!(
        fixture.reload(&execution).await.status,
        ExecutionStatus::Active
    );

    assert_eq!(worker.pool().poll_once().await.unwrap(), 1);
    assert!(worker.pool().wait_idle(Duration::from_secs(5)).await);

    let done = fixture.reload(&execution).await;
    assert_eq!(done.status, ExecutionStatus::Success);
    assert_eq!(done.task_id.as_deref(), Some(root_id.as_str()));
    assert_eq!(succeeded.load(Ordering::SeqCst), 1);

    let summary = fixture
        .repos
        .resource_data
        .find(execution.id, "summary")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.value, Some(json!({"rows": 12})));
    assert!(summary.marked_for_refresh);
}

#[tokio::test]
async fn test_worker_requires_instance_name() {
    let fixture = Fixture::new().await;
    let mut config = config();
    config.instance = None;

    let result = WorkerBuilder::new(config, fixture.infra.clone(), RiberryApp::new("reports")).build();
    assert!(matches!(result, Err(RiberryError::Configuration(_))));
}

#[tokio::test]
async fn test_optional_steps_follow_configuration() {
    let fixture = Fixture::new().await;
    let succeeded = Arc::new(AtomicUsize::new(0));

    let mut minimal = config();
    minimal.background.events_enabled = false;
    assert_eq!(
        worker(&fixture, minimal, succeeded.clone()).loops().step_count(),
        1
    );

    let mut full = config();
    full.background.capacity_distributor_enabled = true;
    full.capacity.enabled = true;
    full.worker.receiver = true;
    let worker = worker(&fixture, full, succeeded);
    assert_eq!(worker.loops().step_count(), 4);
    assert!(worker.receiver().is_some());
    assert_eq!(worker.scale().worker_uuid(), "worker-a");
}

#[tokio::test]
async fn test_start_and_stop() {
    let fixture = Fixture::new().await;
    let worker = worker(&fixture, config(), Arc::new(AtomicUsize::new(0)));

    worker.start().await.unwrap();
    assert!(worker.is_running().await);
    assert!(worker.start().await.is_err());

    worker.stop().await.unwrap();
    assert!(!worker.is_running().await);
    assert!(!worker.pool().is_running().await);
    worker.stop().await.unwrap();
}

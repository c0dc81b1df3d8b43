mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use riberry_core::{config::ScaleConfig, TaskMessage};
use riberry_worker::{
    task_fn, ConsumerControl, ScaleController, TaskOptions, TaskRegistry, WorkerPool,
};
use serde_json::{json, Value};

fn counting_tasks(calls: Arc<AtomicUsize>, delay: Duration) -> TaskRegistry {
    let mut tasks = TaskRegistry::new();
    tasks
        .register_unmanaged(
            "tick",
            task_fn(move |_| {
                let calls = calls.clone();
                Box::pin(async move {
                    tokio::time::sleep(delay).await;
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                })
            }),
            TaskOptions::default(),
        )
        .unwrap();
    tasks
}

fn pool(fixture: &Fixture, tasks: TaskRegistry, queues: &[&str], concurrency: usize, multiplier: usize) -> Arc<WorkerPool> {
    Arc::new(WorkerPool::new(
        Arc::new(fixture.executor(tasks)),
        fixture.infra.transport.clone(),
        queues.iter().map(|q| q.to_string()).collect(),
        concurrency,
        multiplier,
    ))
}

async fn publish(fixture: &Fixture, count: usize) {
    for _ in 0..count {
        fixture
            .infra
            .transport
            .publish_message(DEFAULT_QUEUE, &TaskMessage::new("tick", json!({})))
            .await
            .unwrap();
    }
}

fn controller(fixture: &Fixture, config: ScaleConfig, pool: Arc<WorkerPool>, member: &str) -> ScaleController {
    ScaleController::new(
        config,
        INSTANCE,
        fixture.infra.store.clone(),
        fixture.repos.clone(),
        fixture.infra.transport.clone(),
        pool,
        1,
    )
    .with_worker_uuid(member)
}

fn scaling() -> ScaleConfig {
    ScaleConfig {
        enabled: true,
        ..ScaleConfig::default()
    }
}

#[tokio::test]
async fn test_pool_respects_concurrency() {
    let fixture = Fixture::new().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let pool = pool(&fixture, counting_tasks(calls.clone(), Duration::ZERO), &[DEFAULT_QUEUE], 2, 1);
    publish(&fixture, 3).await;

    assert_eq!(pool.poll_once().await.unwrap(), 2);
    assert!(pool.wait_idle(Duration::from_secs(5)).await);
    assert_eq!(pool.poll_once().await.unwrap(), 1);
    assert!(pool.wait_idle(Duration::from_secs(5)).await);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(pool.poll_once().await.unwrap(), 0);
}

#[tokio::test]
async fn test_stop_returns_reserved_messages() {
    let fixture = Fixture::new().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let pool = pool(
        &fixture,
        counting_tasks(calls.clone(), Duration::from_millis(50)),
        &[DEFAULT_QUEUE],
        1,
        3,
    );
    publish(&fixture, 3).await;

    assert_eq!(pool.poll_once().await.unwrap(), 1);
    assert_eq!(pool.reserved_count().await, 2);

    pool.stop().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(pool.reserved_count().await, 0);
    assert_eq!(
        fixture.infra.transport.get_queue_size(DEFAULT_QUEUE).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn test_group_members_share_scheduled_concurrency() {
    let fixture = Fixture::new().await;
    fixture.schedule("concurrency", "6").await;
    publish(&fixture, 1).await;

    let pool = pool(&fixture, TaskRegistry::new(), &[DEFAULT_QUEUE], 1, 1);
    let scale = controller(&fixture, scaling(), pool.clone(), "a");

    scale.update().await.unwrap();
    assert_eq!(scale.refresh_group().await.unwrap(), 1);
    assert_eq!(scale.update().await.unwrap(), Some(6));

    scale.scale().await.unwrap();
    assert_eq!(pool.pool_size().await, 6);
    assert_eq!(pool.prefetch().await, 6);

    let now = fixture.infra.store.time().await.unwrap();
    fixture
        .infra
        .store
        .zadd(&scale.log_key(), &[("b".to_string(), now)])
        .await
        .unwrap();
    assert_eq!(scale.refresh_group().await.unwrap(), 2);
    assert_eq!(scale.update().await.unwrap(), Some(3));

    scale.scale().await.unwrap();
    assert_eq!(pool.pool_size().await, 3);
    assert_eq!(pool.prefetch().await, 3);
}

#[tokio::test]
async fn test_growth_is_bounded_by_max_step() {
    let fixture = Fixture::new().await;
    fixture.schedule("concurrency", "20").await;
    publish(&fixture, 1).await;

    let pool = pool(&fixture, TaskRegistry::new(), &[DEFAULT_QUEUE], 2, 1);
    let config = ScaleConfig {
        max_step: 4,
        ..scaling()
    };
    let scale = controller(&fixture, config, pool.clone(), "a");

    scale.update().await.unwrap();
    scale.refresh_group().await.unwrap();
    assert_eq!(scale.update().await.unwrap(), Some(20));

    scale.scale().await.unwrap();
    assert_eq!(pool.pool_size().await, 6);
    scale.scale().await.unwrap();
    assert_eq!(pool.pool_size().await, 10);
}

#[tokio::test]
async fn test_idle_worker_stops_consuming_and_resumes() {
    let fixture = Fixture::new().await;
    let pool = pool(
        &fixture,
        TaskRegistry::new(),
        &[DEFAULT_QUEUE, "rib.external"],
        1,
        1,
    );
    let scale = controller(&fixture, ScaleConfig::default(), pool.clone(), "a")
        .with_ignore_queue("rib.external");

    assert_eq!(scale.update().await.unwrap(), Some(0));
    assert!(!scale.is_active().await);
    scale.scale().await.unwrap();
    assert_eq!(pool.pool_size().await, 0);
    assert_eq!(pool.queues().await, vec!["rib.external".to_string()]);
    assert_eq!(pool.prefetch().await, 1);

    publish(&fixture, 1).await;
    assert_eq!(scale.update().await.unwrap(), Some(1));
    assert!(scale.is_active().await);
    scale.scale().await.unwrap();
    assert_eq!(pool.pool_size().await, 1);
    assert!(pool.queues().await.contains(&DEFAULT_QUEUE.to_string()));
}

#[tokio::test]
async fn test_inactive_parameter_scales_to_zero() {
    let fixture = Fixture::new().await;
    fixture.schedule("active", "N").await;
    publish(&fixture, 1).await;

    let pool = pool(&fixture, TaskRegistry::new(), &[DEFAULT_QUEUE], 2, 1);
    let scale = controller(&fixture, scaling(), pool.clone(), "a");

    assert_eq!(scale.update().await.unwrap(), Some(0));
    scale.scale().await.unwrap();
    assert_eq!(pool.pool_size().await, 0);
    assert!(pool.queues().await.is_empty());
}

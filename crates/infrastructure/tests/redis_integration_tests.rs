use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use riberry_core::{MessageQueue, RedisConfig, SharedStore, TaskMessage};
use riberry_infrastructure::{DistributedLock, PriorityQueue, RedisMessageQueue, RedisSharedStore};
use serde_json::json;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

struct RedisTestContainer {
    #[allow(dead_code)]
    container: ContainerAsync<Redis>,
    config: RedisConfig,
}

impl RedisTestContainer {
    async fn new() -> Result<Self> {
        let container = Redis::default().with_tag("7-alpine").start().await?;
        let port = container.get_host_port_ipv4(6379).await?;
        let config = RedisConfig {
            url: format!("redis://localhost:{port}"),
            ..RedisConfig::default()
        };
        Ok(Self { container, config })
    }
}

#[tokio::test]
#[ignore] // 需要Docker运行
async fn test_redis_store_lock_and_cas() -> Result<()> {
    let redis = RedisTestContainer::new().await?;
    let store = RedisSharedStore::connect(&redis.config).await?;

    assert!(store.try_lock("lock:a", "t1", 1_000).await?);
    assert!(!store.try_lock("lock:a", "t2", 1_000).await?);
    assert!(!store.unlock("lock:a", "t2").await?);
    assert!(store.unlock("lock:a", "t1").await?);

    assert!(store.compare_and_swap("counter", None, "1").await?);
    assert!(!store.compare_and_swap("counter", None, "2").await?);
    assert!(store.compare_and_swap("counter", Some("1"), "2").await?);
    assert_eq!(store.get("counter").await?.as_deref(), Some("2"));

    assert!(store.time().await? > 0.0);
    Ok(())
}

#[tokio::test]
#[ignore] // 需要Docker运行
async fn test_redis_priority_queue_scenario() -> Result<()> {
    let redis = RedisTestContainer::new().await?;
    let store: Arc<dyn SharedStore> = Arc::new(RedisSharedStore::connect(&redis.config).await?);
    let pq = PriorityQueue::new(store, "pq", "reports");

    let scores = BTreeMap::from([("a".to_string(), 3), ("b".to_string(), 1)]);
    let version = pq.update(&scores).await?;

    assert_eq!(pq.pop().await?.map(|l| l.member), Some("a".to_string()));
    assert_eq!(pq.pop().await?.map(|l| l.member), Some("a".to_string()));
    assert_eq!(pq.pop().await?.map(|l| l.member), Some("b".to_string()));

    pq.put("b", version).await?;
    let total: f64 = pq.items().await?.iter().map(|(_, s)| s).sum();
    let leased: f64 = pq.leased_items().await?.iter().map(|(_, s)| s).sum();
    assert_eq!(total + leased, 4.0);
    Ok(())
}

#[tokio::test]
#[ignore] // 需要Docker运行
async fn test_redis_transport_priority_and_delay() -> Result<()> {
    let redis = RedisTestContainer::new().await?;
    let queue = RedisMessageQueue::connect(&redis.config).await?;

    queue
        .publish_message("rib.default", &TaskMessage::new("low", json!({})).with_priority(1))
        .await?;
    queue
        .publish_message("rib.default", &TaskMessage::new("high", json!({})).with_priority(8))
        .await?;
    queue
        .publish_delayed(
            "rib.default",
            &TaskMessage::new("later", json!({})),
            Duration::from_millis(300),
        )
        .await?;

    assert_eq!(queue.get_queue_size("rib.default").await?, 2);
    let first = queue.consume_message("rib.default").await?.unwrap();
    let second = queue.consume_message("rib.default").await?.unwrap();
    assert_eq!((first.task_name.as_str(), second.task_name.as_str()), ("high", "low"));
    assert!(queue.consume_message("rib.default").await?.is_none());

    tokio::time::sleep(Duration::from_millis(400)).await;
    let delayed = queue.consume_message("rib.default").await?.unwrap();
    assert_eq!(delayed.task_name, "later");
    Ok(())
}

#[tokio::test]
#[ignore] // 需要Docker运行
async fn test_redis_throttled_lock() -> Result<()> {
    let redis = RedisTestContainer::new().await?;
    let store: Arc<dyn SharedStore> = Arc::new(RedisSharedStore::connect(&redis.config).await?);
    let lock = DistributedLock::new(store, "step:background", Duration::from_millis(500));

    assert_eq!(lock.run(|| async { 1 }).await?, Some(1));
    assert_eq!(lock.run(|| async { 2 }).await?, None);
    Ok(())
}

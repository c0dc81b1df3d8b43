//! 带节流的分布式锁
//!
//! 工作完成后写入 `lock:<name>:timeout`，在其过期前任何副本都不会再次获取锁，
//! 使整个集群的执行频率不超过约 `1/interval`。

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use riberry_core::{RiberryResult, SharedStore};
use tracing::{debug, warn};
use uuid::Uuid;

/// 锁的默认持有时长
pub const DEFAULT_LOCK_HOLD: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn SharedStore>,
    name: String,
    interval: Duration,
    min_interval: Duration,
    hold: Duration,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn SharedStore>, name: impl Into<String>, interval: Duration) -> Self {
        Self {
            store,
            name: name.into(),
            interval,
            min_interval: Duration::from_millis(100),
            hold: DEFAULT_LOCK_HOLD,
        }
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn acquire_key(&self) -> String {
        format!("lock:{}:acquire", self.name)
    }

    fn timeout_key(&self) -> String {
        format!("lock:{}:timeout", self.name)
    }

    /// 获得锁时执行 `on_acquired`，未获得时返回 `None`
    pub async fn run<F, Fut, T>(&self, on_acquired: F) -> RiberryResult<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self.store.exists(&self.timeout_key()).await? {
            return Ok(None);
        }

        let token = Uuid::new_v4().to_string();
        let acquire_key = self.acquire_key();
        if !self
            .store
            .try_lock(&acquire_key, &token, self.hold.as_millis() as u64)
            .await?
        {
            debug!(lock = %self.name, "锁已被其他副本持有");
            return Ok(None);
        }
        metrics::counter!(crate::observability::LOCK_ACQUISITIONS, "lock" => self.name.clone())
            .increment(1);

        let started = Instant::now();
        let result = on_acquired().await;
        let elapsed = started.elapsed();

        let timeout_ms = throttle_timeout_ms(self.interval, elapsed, self.min_interval);
        let fenced = self
            .store
            .set_px(&self.timeout_key(), "1", timeout_ms)
            .await;
        let released = self.store.unlock(&acquire_key, &token).await;

        fenced?;
        if !released? {
            warn!(lock = %self.name, "释放锁时持有者已变化，工作耗时 {:?}", elapsed);
        }

        Ok(Some(result))
    }
}

/// `max(interval - elapsed, min_interval)`，单位毫秒
pub fn throttle_timeout_ms(interval: Duration, elapsed: Duration, min_interval: Duration) -> u64 {
    let remaining = interval.saturating_sub(elapsed);
    remaining.max(min_interval).as_millis() as u64
}

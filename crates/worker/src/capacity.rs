//! 工作进程侧的容量插件
//!
//! 把调度参数中的生产者配额（`"p1|3 p2|1"`）装入优先队列，任务从中借出一个生产者，
//! 完成后归还。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use riberry_core::{config::CapacityConfig, RiberryResult, SharedStore};
use riberry_dispatcher::{InstanceSnapshot, PeriodicStep};
use riberry_domain::{parse_producer_value, Repositories};
use riberry_infrastructure::observability::CAPACITY_UPDATES;
use riberry_infrastructure::{PqLease, PriorityQueue};
use tracing::{debug, info};

/// 容量同步的锁槽位
pub const CAPACITY_LOCK: &str = "step:capacity";

/// 借出的生产者配额
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityLease {
    lease: PqLease,
}

impl CapacityLease {
    /// 生产者名称
    pub fn producer(&self) -> &str {
        &self.lease.member
    }

    pub fn remaining(&self) -> f64 {
        self.lease.score
    }

    pub fn version(&self) -> u64 {
        self.lease.version
    }
}

#[derive(Clone)]
pub struct CapacityAddon {
    queue: PriorityQueue,
    parameter: String,
    separator: String,
}

impl CapacityAddon {
    /// 未配置 `key` 时使用实例名
    pub fn from_config(store: Arc<dyn SharedStore>, config: &CapacityConfig, instance_name: &str) -> Self {
        let key = config.key.clone().unwrap_or_else(|| instance_name.to_string());
        let queue = PriorityQueue::new(store, config.prefix.clone(), key)
            .with_blocking(config.blocking, Duration::from_millis(config.block_retry_ms));
        Self {
            queue,
            parameter: config.parameter.clone(),
            separator: config.separator.clone(),
        }
    }

    pub fn queue(&self) -> &PriorityQueue {
        &self.queue
    }

    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    pub async fn borrow(&self) -> RiberryResult<Option<CapacityLease>> {
        Ok(self.queue.pop().await?.map(|lease| CapacityLease { lease }))
    }

    pub async fn give_back(&self, lease: CapacityLease) -> RiberryResult<()> {
        self.queue.put_lease(&lease.lease).await
    }

    /// 配置值变化时安装新版本，返回是否更新
    pub async fn sync(&self, value: &str) -> RiberryResult<bool> {
        if self.queue.raw_value().await?.as_deref() == Some(value) {
            debug!(key = %self.queue.key(), "生产者配额未变化");
            return Ok(false);
        }

        let producers = parse_producer_value(value, &self.separator);
        let version = self.queue.update(&producers).await?;
        // 安装成功后才记录原值，失败时下一轮重试
        self.queue.set_raw_value(value).await?;

        metrics::counter!(CAPACITY_UPDATES).increment(1);
        info!(key = %self.queue.key(), version, producers = producers.len(), "生产者配额已更新");
        Ok(true)
    }
}

/// 周期性地把调度参数同步到优先队列
pub struct CapacityStep {
    addon: CapacityAddon,
    repos: Repositories,
    instance_name: String,
}

impl CapacityStep {
    pub fn new(addon: CapacityAddon, repos: Repositories, instance_name: impl Into<String>) -> Self {
        Self {
            addon,
            repos,
            instance_name: instance_name.into(),
        }
    }
}

#[async_trait]
impl PeriodicStep for CapacityStep {
    fn name(&self) -> &str {
        CAPACITY_LOCK
    }

    async fn run_once(&self) -> RiberryResult<()> {
        let snapshot = InstanceSnapshot::load(&self.repos, &self.instance_name).await?;
        let value = snapshot.value(self.addon.parameter()).unwrap_or_default();
        self.addon.sync(&value).await?;
        Ok(())
    }
}

//! 带版本的共享资源优先队列
//!
//! 每个版本是一对有序集合 `free` 与 `lease`，`pop` 从 `free` 借出、`put` 归还。
//! 重新配置时只递增版本并写入新集合，旧版本的计数不再被修改。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use riberry_core::{RiberryError, RiberryResult, SharedStore};
use tracing::{debug, info};

/// 一次借出
#[derive(Debug, Clone, PartialEq)]
pub struct PqLease {
    pub member: String,
    /// 借出后 `free` 中剩余的分数
    pub score: f64,
    pub version: u64,
}

#[derive(Clone)]
pub struct PriorityQueue {
    store: Arc<dyn SharedStore>,
    prefix: String,
    key: String,
    blocking: bool,
    block_retry: Duration,
}

impl PriorityQueue {
    pub fn new(store: Arc<dyn SharedStore>, prefix: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            key: key.into(),
            blocking: true,
            block_retry: Duration::from_millis(500),
        }
    }

    pub fn with_blocking(mut self, blocking: bool, block_retry: Duration) -> Self {
        self.blocking = blocking;
        self.block_retry = block_retry;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn counter_key(&self) -> String {
        format!("{}:{}:counter", self.prefix, self.key)
    }

    fn raw_key(&self) -> String {
        format!("{}:{}:raw", self.prefix, self.key)
    }

    pub fn free_key(&self, version: u64) -> String {
        format!("{}:{}:{:09}:free", self.prefix, self.key, version)
    }

    pub fn lease_key(&self, version: u64) -> String {
        format!("{}:{}:{:09}:lease", self.prefix, self.key, version)
    }

    /// 当前版本，未初始化时为0
    pub async fn version(&self) -> RiberryResult<u64> {
        match self.store.get(&self.counter_key()).await? {
            Some(raw) => parse_version(&raw),
            None => Ok(0),
        }
    }

    /// 以新版本安装成员分数，返回新版本号
    pub async fn update(&self, member_scores: &BTreeMap<String, i64>) -> RiberryResult<u64> {
        let counter_key = self.counter_key();
        let version = loop {
            let current = self.store.get(&counter_key).await?;
            let next = match current.as_deref() {
                Some(raw) => parse_version(raw)? + 1,
                None => 1,
            };
            if self
                .store
                .compare_and_swap(&counter_key, current.as_deref(), &next.to_string())
                .await?
            {
                break next;
            }
            debug!("优先队列 {} 版本竞争，重试", self.key);
        };

        self.store
            .delete(&[self.free_key(version), self.lease_key(version)])
            .await?;
        let members: Vec<(String, f64)> = member_scores
            .iter()
            .map(|(member, score)| (member.clone(), *score as f64))
            .collect();
        self.store.zadd(&self.free_key(version), &members).await?;

        if version > 1 {
            self.collect_version(version - 1).await?;
        }

        info!("优先队列 {} 已更新到版本 {}", self.key, version);
        Ok(version)
    }

    /// 旧版本没有未归还的借出时删除其集合
    async fn collect_version(&self, version: u64) -> RiberryResult<()> {
        let leased = self
            .store
            .zrevrange_with_scores(&self.lease_key(version))
            .await?;
        if leased.iter().all(|(_, score)| *score <= 0.0) {
            self.store
                .delete(&[self.free_key(version), self.lease_key(version)])
                .await?;
        }
        Ok(())
    }

    /// 借出当前版本中分数最高的成员，集合为空且阻塞时等待重试
    pub async fn pop(&self) -> RiberryResult<Option<PqLease>> {
        loop {
            let version = self.version().await?;
            if version > 0 {
                if let Some((member, score)) = self
                    .store
                    .zmove_top(&self.free_key(version), &self.lease_key(version))
                    .await?
                {
                    debug!(member = %member, score, version, "优先队列借出");
                    return Ok(Some(PqLease {
                        member,
                        score,
                        version,
                    }));
                }
            }

            if !self.blocking {
                return Ok(None);
            }
            tokio::time::sleep(self.block_retry).await;
        }
    }

    /// 在借出时的版本上归还
    pub async fn put(&self, member: &str, version: u64) -> RiberryResult<()> {
        self.store
            .zmove(&self.lease_key(version), &self.free_key(version), member)
            .await?;
        debug!(member = %member, version, "优先队列归还");
        Ok(())
    }

    pub async fn put_lease(&self, lease: &PqLease) -> RiberryResult<()> {
        self.put(&lease.member, lease.version).await
    }

    /// 当前版本 `free` 的快照，分数降序
    pub async fn items(&self) -> RiberryResult<Vec<(String, f64)>> {
        let version = self.version().await?;
        self.store.zrevrange_with_scores(&self.free_key(version)).await
    }

    pub async fn leased_items(&self) -> RiberryResult<Vec<(String, f64)>> {
        let version = self.version().await?;
        self.store.zrevrange_with_scores(&self.lease_key(version)).await
    }

    /// 最近一次安装的原始配置值
    pub async fn raw_value(&self) -> RiberryResult<Option<String>> {
        self.store.get(&self.raw_key()).await
    }

    pub async fn set_raw_value(&self, value: &str) -> RiberryResult<()> {
        self.store.set(&self.raw_key(), value).await
    }
}

fn parse_version(raw: &str) -> RiberryResult<u64> {
    raw.parse::<u64>()
        .map_err(|e| RiberryError::StoreOperation(format!("优先队列版本号无效 {raw}: {e}")))
}

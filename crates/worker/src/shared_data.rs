//! 作业执行内的共享数据
//!
//! 同一执行的任务之间按名称共享 JSON 值。写入必须先持有该名称的锁，释放时若
//! 写过数据则标记为需要刷新，后台循环据此触发 `on_data_updated` 处理器。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use riberry_core::{RiberryError, RiberryResult};
use riberry_dispatcher::{BackgroundHook, InstanceSnapshot};
use riberry_domain::{Repositories, ResourceDataRepository};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::events::{EventRegistry, RegistryEvent};

#[derive(Clone)]
pub struct SharedExecutionData {
    repo: Arc<dyn ResourceDataRepository>,
    execution_id: i64,
    holder: String,
    lock_ttl: Duration,
    poll_interval: Duration,
}

impl SharedExecutionData {
    pub fn new(
        repo: Arc<dyn ResourceDataRepository>,
        execution_id: i64,
        holder: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            execution_id,
            holder: holder.into(),
            lock_ttl: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_lock_timing(mut self, ttl: Duration, poll_interval: Duration) -> Self {
        self.lock_ttl = ttl;
        self.poll_interval = poll_interval;
        self
    }

    pub fn execution_id(&self) -> i64 {
        self.execution_id
    }

    /// 不加锁读取
    pub async fn get(&self, name: &str) -> RiberryResult<Option<Value>> {
        Ok(self
            .repo
            .find(self.execution_id, name)
            .await?
            .and_then(|data| data.value))
    }

    pub async fn names(&self) -> RiberryResult<Vec<String>> {
        self.repo.list_names(self.execution_id).await
    }

    pub async fn try_lock(&self, name: &str) -> RiberryResult<bool> {
        self.repo.get_or_create(self.execution_id, name).await?;
        let now = Utc::now();
        let expiry = now + chrono::Duration::from_std(self.lock_ttl).unwrap_or_else(|_| chrono::Duration::seconds(60));
        self.repo
            .try_lock(self.execution_id, name, &self.holder, expiry, now)
            .await
    }

    /// 轮询直到获得锁
    pub async fn lock(&self, name: &str) -> RiberryResult<()> {
        loop {
            if self.try_lock(name).await? {
                debug!(name = %name, holder = %self.holder, "已获得共享数据锁");
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// 仅锁持有者可以写入
    pub async fn set(&self, name: &str, value: &Value) -> RiberryResult<()> {
        let written = self
            .repo
            .write_locked(self.execution_id, name, &self.holder, value, Utc::now())
            .await?;
        if !written {
            return Err(RiberryError::LockContention(format!(
                "未持有共享数据 {name} 的锁，不能写入"
            )));
        }
        Ok(())
    }

    pub async fn release(&self, name: &str, dirty: bool) -> RiberryResult<bool> {
        self.repo
            .unlock(self.execution_id, name, &self.holder, dirty)
            .await
    }

    /// 加锁后读取、修改并写回，释放时标记为需要刷新
    pub async fn update<F>(&self, name: &str, f: F) -> RiberryResult<Value>
    where
        F: FnOnce(Option<Value>) -> Value,
    {
        self.lock(name).await?;
        let result = async {
            let value = f(self.get(name).await?);
            self.set(name, &value).await?;
            Ok(value)
        }
        .await;
        self.release(name, result.is_ok()).await?;
        result
    }

    /// 每个执行中 `key` 对应的工作只运行一次
    ///
    /// 返回本次调用是否执行了 `f`。
    pub async fn execute_once<F, Fut>(&self, key: &str, f: F) -> RiberryResult<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RiberryResult<()>>,
    {
        self.lock(key).await?;
        let result = async {
            let done = self
                .get(key)
                .await?
                .map(|value| is_truthy(&value))
                .unwrap_or(false);
            if done {
                return Ok(false);
            }
            self.set(key, &Value::Bool(true)).await?;
            f().await?;
            Ok(true)
        }
        .await;
        self.release(key, false).await?;
        result
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// 为当前实例的已修改共享数据触发 `on_data_updated`
pub struct DataRefresher {
    repos: Repositories,
    registry: Arc<EventRegistry>,
}

impl DataRefresher {
    pub fn new(repos: Repositories, registry: Arc<EventRegistry>) -> Self {
        Self { repos, registry }
    }

    /// 返回处理的条目数
    pub async fn refresh(&self, instance_id: i64) -> RiberryResult<usize> {
        let marked = self.repos.resource_data.list_marked_for_refresh(None).await?;
        let mut refreshed = 0;

        for data in marked {
            let Some(execution) = self.repos.executions.find_by_id(data.resource_id).await? else {
                continue;
            };
            let Some(job) = self.repos.jobs.find_job(execution.job_id).await? else {
                continue;
            };
            let Some(form) = self.repos.jobs.find_form(job.form_id).await? else {
                continue;
            };
            if form.instance_id != instance_id {
                continue;
            }

            let event = RegistryEvent::DataUpdated {
                execution,
                name: data.name.clone(),
            };
            for outcome in self.registry.call(&event).await {
                if let Err(e) = outcome {
                    error!(name = %data.name, "共享数据更新处理器失败: {}", e);
                }
            }

            self.repos.resource_data.clear_refresh_mark(data.id).await?;
            refreshed += 1;
        }

        if refreshed > 0 {
            info!(refreshed, "已处理共享数据更新");
        }
        Ok(refreshed)
    }
}

#[async_trait]
impl BackgroundHook for DataRefresher {
    async fn run(&self, snapshot: &InstanceSnapshot) -> RiberryResult<()> {
        self.refresh(snapshot.instance.id).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&Value::Bool(false)));
        assert!(!is_truthy(&serde_json::json!(0)));
        assert!(!is_truthy(&serde_json::json!("")));
        assert!(is_truthy(&serde_json::json!(true)));
        assert!(is_truthy(&serde_json::json!({"done": 1})));
    }
}

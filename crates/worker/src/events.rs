//! 应用事件回调注册表
//!
//! 处理器按 `(类型, 键)` 注册：`on_completion` 以执行状态为键，`on_data_updated`
//! 以共享数据名为键，`on_external_result_received` 以验证器名为键。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use riberry_core::{RiberryError, RiberryResult};
use riberry_domain::{
    CompletionHook, ExecutionStatus, ExternalTask, JobExecution, ResourceDataRepository,
};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::shared_data::SharedExecutionData;

/// 一次性处理器在共享数据中的锁持有者
const ONCE_HOLDER: &str = "riberry.event_registry";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    OnCompletion,
    OnDataUpdated,
    OnExternalResultReceived,
}

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Completion {
        execution: JobExecution,
        status: ExecutionStatus,
    },
    DataUpdated {
        execution: JobExecution,
        name: String,
    },
    ExternalResult {
        task: ExternalTask,
        validator: String,
    },
}

impl RegistryEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RegistryEvent::Completion { .. } => EventKind::OnCompletion,
            RegistryEvent::DataUpdated { .. } => EventKind::OnDataUpdated,
            RegistryEvent::ExternalResult { .. } => EventKind::OnExternalResultReceived,
        }
    }

    pub fn key(&self) -> String {
        match self {
            RegistryEvent::Completion { status, .. } => status.as_str().to_string(),
            RegistryEvent::DataUpdated { name, .. } => name.clone(),
            RegistryEvent::ExternalResult { validator, .. } => validator.clone(),
        }
    }

    pub fn execution_id(&self) -> i64 {
        match self {
            RegistryEvent::Completion { execution, .. }
            | RegistryEvent::DataUpdated { execution, .. } => execution.id,
            RegistryEvent::ExternalResult { task, .. } => task.job_execution_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    Done,
    /// 外部结果未通过验证，以新的输入重新等待
    Retry { input_data: Option<Value> },
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &RegistryEvent) -> RiberryResult<HandlerOutcome>;
}

pub struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(RegistryEvent) -> BoxFuture<'static, RiberryResult<HandlerOutcome>> + Send + Sync,
{
    async fn handle(&self, event: &RegistryEvent) -> RiberryResult<HandlerOutcome> {
        (self.0)(event.clone()).await
    }
}

pub fn handler_fn<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(RegistryEvent) -> BoxFuture<'static, RiberryResult<HandlerOutcome>> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

#[derive(Clone)]
struct Registration {
    handler: Arc<dyn EventHandler>,
    /// 每个执行只运行一次时的共享数据键
    once_key: Option<String>,
}

#[derive(Clone, Default)]
pub struct EventRegistry {
    registrations: HashMap<(EventKind, String), Vec<Registration>>,
    resource_data: Option<Arc<dyn ResourceDataRepository>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 一次性处理器需要共享数据仓储
    pub fn with_resource_data(mut self, repo: Arc<dyn ResourceDataRepository>) -> Self {
        self.resource_data = Some(repo);
        self
    }

    pub fn register(
        &mut self,
        kind: EventKind,
        key: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> RiberryResult<()> {
        self.insert(kind, key.into(), handler, None)
    }

    fn insert(
        &mut self,
        kind: EventKind,
        key: String,
        handler: Arc<dyn EventHandler>,
        once_key: Option<String>,
    ) -> RiberryResult<()> {
        let entries = self.registrations.entry((kind, key.clone())).or_default();
        if kind == EventKind::OnExternalResultReceived && !entries.is_empty() {
            return Err(RiberryError::Configuration(format!(
                "外部结果验证器重复注册: {key}"
            )));
        }
        entries.push(Registration { handler, once_key });
        Ok(())
    }

    pub fn execution_failed(&mut self, handler: Arc<dyn EventHandler>) -> RiberryResult<()> {
        self.insert(
            EventKind::OnCompletion,
            ExecutionStatus::Failure.as_str().to_string(),
            handler,
            Some("_internal:once.execution_failed".to_string()),
        )
    }

    pub fn execution_succeeded(&mut self, handler: Arc<dyn EventHandler>) -> RiberryResult<()> {
        self.insert(
            EventKind::OnCompletion,
            ExecutionStatus::Success.as_str().to_string(),
            handler,
            Some("_internal:once.execution_succeeded".to_string()),
        )
    }

    pub fn data_updated(&mut self, name: &str, handler: Arc<dyn EventHandler>) -> RiberryResult<()> {
        self.register(EventKind::OnDataUpdated, name, handler)
    }

    pub fn external_result_received(
        &mut self,
        validator: &str,
        handler: Arc<dyn EventHandler>,
    ) -> RiberryResult<()> {
        self.register(EventKind::OnExternalResultReceived, validator, handler)
    }

    pub fn handler_count(&self, kind: EventKind, key: &str) -> usize {
        self.registrations
            .get(&(kind, key.to_string()))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// 按注册顺序调用匹配的处理器，返回每个处理器的结果
    pub async fn call(&self, event: &RegistryEvent) -> Vec<RiberryResult<HandlerOutcome>> {
        let Some(entries) = self.registrations.get(&(event.kind(), event.key())) else {
            debug!(kind = ?event.kind(), key = %event.key(), "没有匹配的事件处理器");
            return Vec::new();
        };

        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            let outcome = match (&entry.once_key, &self.resource_data) {
                (Some(once_key), Some(repo)) => {
                    self.call_once(repo.clone(), once_key, entry, event).await
                }
                (Some(_), None) => {
                    warn!("未配置共享数据仓储，一次性处理器按普通处理器调用");
                    entry.handler.handle(event).await
                }
                (None, _) => entry.handler.handle(event).await,
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn call_once(
        &self,
        repo: Arc<dyn ResourceDataRepository>,
        once_key: &str,
        entry: &Registration,
        event: &RegistryEvent,
    ) -> RiberryResult<HandlerOutcome> {
        let data = SharedExecutionData::new(repo, event.execution_id(), ONCE_HOLDER);
        let mut outcome = HandlerOutcome::Done;
        let slot = &mut outcome;
        let executed = data
            .execute_once(once_key, move || async move {
                *slot = entry.handler.handle(event).await?;
                Ok(())
            })
            .await?;
        if !executed {
            debug!(key = %once_key, "一次性处理器已运行过，跳过");
        }
        Ok(outcome)
    }
}

#[async_trait]
impl CompletionHook for EventRegistry {
    async fn on_completion(
        &self,
        execution: &JobExecution,
        status: ExecutionStatus,
    ) -> RiberryResult<()> {
        let event = RegistryEvent::Completion {
            execution: execution.clone(),
            status,
        };
        for outcome in self.call(&event).await {
            if let Err(e) = outcome {
                error!(execution_id = execution.id, "完成处理器失败: {}", e);
            }
        }
        Ok(())
    }
}

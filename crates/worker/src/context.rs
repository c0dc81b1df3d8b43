//! 任务执行上下文
//!
//! 每次任务调用都绑定 `(root_id, task_id, stream, step, category)`，产物、通知、
//! 共享数据与子任务都通过上下文归属到所在的作业执行。

use std::sync::Arc;
use std::time::Duration;

use riberry_core::{
    MessageQueue, RiberryError, RiberryResult, TaskMessage, TaskProperties, TaskRouter,
};
use riberry_domain::{
    CustomEmail, ErrorReport, Event, EventOrigin, ExecutionLifecycle, JobExecution, NewArtifact,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::capacity::{CapacityAddon, CapacityLease};
use crate::emitter::StreamEventEmitter;
use crate::external::ExternalTasks;
use crate::shared_data::SharedExecutionData;

/// 工作进程内所有任务共享的依赖
pub struct WorkerServices {
    pub instance_name: String,
    pub lifecycle: ExecutionLifecycle,
    pub transport: Arc<dyn MessageQueue>,
    pub router: TaskRouter,
    pub emitter: StreamEventEmitter,
    pub capacity: Option<CapacityAddon>,
    pub data_lock_ttl: Duration,
    pub data_poll_interval: Duration,
}

impl WorkerServices {
    pub fn new(
        instance_name: impl Into<String>,
        lifecycle: ExecutionLifecycle,
        transport: Arc<dyn MessageQueue>,
        router: TaskRouter,
    ) -> Self {
        Self {
            instance_name: instance_name.into(),
            emitter: StreamEventEmitter::new(lifecycle.clone()),
            lifecycle,
            transport,
            router,
            capacity: None,
            data_lock_ttl: Duration::from_secs(60),
            data_poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_capacity(mut self, capacity: CapacityAddon) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// 在 `root_id` 下发布消息，带执行流属性时先记录排队事件
    pub async fn publish(&self, root_id: &str, message: &TaskMessage) -> RiberryResult<()> {
        self.emitter.on_publish(root_id, message).await?;
        let queue = self.router.queue_for(message);
        self.transport.publish_message(&queue, message).await?;
        debug!(task = %message.task_name, task_id = %message.id, queue = %queue, "任务已发布");
        Ok(())
    }
}

#[derive(Clone)]
pub struct TaskContext {
    pub root_id: String,
    pub task_id: String,
    pub task_name: String,
    pub stream: Option<String>,
    pub step: Option<String>,
    pub category: Option<String>,
    pub properties: TaskProperties,
    pub args: serde_json::Value,
    pub retries: u32,
    services: Arc<WorkerServices>,
    replacement: Arc<Mutex<Option<Vec<TaskMessage>>>>,
}

impl TaskContext {
    pub fn from_message(message: &TaskMessage, services: Arc<WorkerServices>) -> Self {
        Self {
            root_id: message.root_id.clone(),
            task_id: message.id.clone(),
            task_name: message.task_name.clone(),
            stream: message.properties.stream.clone(),
            step: message.properties.step.clone(),
            category: message.properties.category.clone(),
            properties: message.properties.clone(),
            args: message.args.clone(),
            retries: message.retries,
            services,
            replacement: Arc::new(Mutex::new(None)),
        }
    }

    pub fn services(&self) -> &WorkerServices {
        &self.services
    }

    pub fn lifecycle(&self) -> &ExecutionLifecycle {
        &self.services.lifecycle
    }

    pub fn instance_name(&self) -> &str {
        &self.services.instance_name
    }

    pub fn origin(&self) -> EventOrigin {
        EventOrigin {
            root_id: self.root_id.clone(),
            task_id: self.task_id.clone(),
            stream: self.stream.clone(),
        }
    }

    /// 读取参数中的字段
    pub fn arg<T: serde::de::DeserializeOwned>(&self, name: &str) -> RiberryResult<T> {
        let value = self.args.get(name).cloned().unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(value)?)
    }

    /// 当前任务所属的作业执行
    pub async fn execution(&self) -> RiberryResult<JobExecution> {
        self.lifecycle()
            .repositories()
            .executions
            .find_by_task_id(&self.root_id)
            .await?
            .ok_or_else(|| RiberryError::RootNotFound {
                root_id: self.root_id.clone(),
            })
    }

    /// 未指定分类时使用上下文中的分类
    pub async fn create_artifact(&self, artifact: NewArtifact) -> RiberryResult<Event> {
        let artifact = match (&artifact.category, &self.category) {
            (None, Some(category)) => artifact.in_category(category.clone()),
            _ => artifact,
        };
        self.lifecycle().create_artifact(&self.origin(), artifact).await
    }

    /// `Exception <task>` 产物，文件名 `<task>-<task_id>.log`
    pub async fn artifact_from_error(
        &self,
        report: &ErrorReport,
        category: &str,
    ) -> RiberryResult<Event> {
        self.lifecycle()
            .artifact_from_error(
                &self.origin(),
                report,
                &format!("Exception {}", self.task_name),
                category,
                &format!("{}-{}.log", self.task_name, self.task_id),
            )
            .await
    }

    pub async fn notify(
        &self,
        notification_type: &str,
        data: serde_json::Value,
    ) -> RiberryResult<Event> {
        self.lifecycle()
            .notify(&self.origin(), notification_type, data)
            .await
    }

    pub async fn send_email(&self, email: CustomEmail) -> RiberryResult<Event> {
        self.lifecycle().send_email(&self.origin(), email).await
    }

    /// 当前作业执行的共享数据，锁持有者为当前任务
    pub async fn data(&self) -> RiberryResult<SharedExecutionData> {
        let execution = self.execution().await?;
        Ok(SharedExecutionData::new(
            self.lifecycle().repositories().resource_data.clone(),
            execution.id,
            self.task_id.clone(),
        )
        .with_lock_timing(self.services.data_lock_ttl, self.services.data_poll_interval))
    }

    pub fn external_tasks(&self) -> ExternalTasks {
        ExternalTasks::new(self.lifecycle().repositories().clone())
    }

    /// 在当前作业执行下发布子任务
    pub async fn send(&self, message: TaskMessage) -> RiberryResult<String> {
        let message = message.with_root(self.root_id.clone());
        self.services.publish(&self.root_id, &message).await?;
        Ok(message.id)
    }

    /// 以任务链替换当前任务，当前任务的回调挂到链尾
    pub async fn replace(&self, chain: Vec<TaskMessage>) -> RiberryResult<()> {
        if chain.is_empty() {
            return Err(RiberryError::TaskExecution("替换的任务链不能为空".to_string()));
        }
        *self.replacement.lock().await = Some(chain);
        Ok(())
    }

    pub(crate) async fn take_replacement(&self) -> Option<Vec<TaskMessage>> {
        self.replacement.lock().await.take()
    }

    /// 借出一个生产者配额，未启用容量插件时报错
    pub async fn borrow_capacity(&self) -> RiberryResult<Option<CapacityLease>> {
        let capacity = self.services.capacity.as_ref().ok_or_else(|| {
            RiberryError::Configuration("未启用容量插件".to_string())
        })?;
        capacity.borrow().await
    }

    pub async fn return_capacity(&self, lease: CapacityLease) -> RiberryResult<()> {
        let capacity = self.services.capacity.as_ref().ok_or_else(|| {
            RiberryError::Configuration("未启用容量插件".to_string())
        })?;
        capacity.give_back(lease).await
    }
}

//! 外部任务
//!
//! 作业执行可以等待系统外部产生的结果：任务创建 `WAITING` 状态的外部任务，外部系统
//! 通过 `mark_as_ready` 提交输出，接收任务在 `rib.external` 队列上检查并交给
//! `on_external_result_received` 处理器验证。

use std::sync::Arc;
use std::time::Duration;

use riberry_core::{RiberryError, RiberryResult, TaskMessage, CHECK_EXTERNAL_TASK};
use riberry_domain::{ExternalTask, ExternalTaskStatus, JobExecution, Repositories};
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::pool::ConsumerControl;

#[derive(Debug, Clone, Default)]
pub struct NewExternalTask {
    pub name: Option<String>,
    pub task_type: Option<String>,
    pub external_task_id: Option<String>,
    pub input_data: Option<serde_json::Value>,
}

impl NewExternalTask {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn of_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_id(mut self, external_task_id: impl Into<String>) -> Self {
        self.external_task_id = Some(external_task_id.into());
        self
    }

    pub fn with_input(mut self, input_data: serde_json::Value) -> Self {
        self.input_data = Some(input_data);
        self
    }
}

#[derive(Clone)]
pub struct ExternalTasks {
    repos: Repositories,
}

impl ExternalTasks {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// 未指定 ID 时生成 UUID，未指定名称时使用 ID
    #[instrument(skip(self, execution, task), fields(execution_id = execution.id))]
    pub async fn create(
        &self,
        execution: &JobExecution,
        task: NewExternalTask,
    ) -> RiberryResult<ExternalTask> {
        let external_task_id = task
            .external_task_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let name = task.name.unwrap_or_else(|| external_task_id.clone());

        let created = self
            .repos
            .external_tasks
            .create(&ExternalTask {
                id: 0,
                job_execution_id: execution.id,
                stream_id: None,
                name,
                task_type: task.task_type.unwrap_or_else(|| "external".to_string()),
                external_task_id,
                status: ExternalTaskStatus::Waiting,
                input_data: task.input_data,
                output_data: None,
            })
            .await?;
        info!(external_task_id = %created.external_task_id, "已创建外部任务");
        Ok(created)
    }

    pub async fn find(&self, external_task_id: &str) -> RiberryResult<Option<ExternalTask>> {
        self.repos
            .external_tasks
            .find_by_external_id(external_task_id)
            .await
    }

    /// 外部系统提交输出
    pub async fn mark_as_ready(
        &self,
        external_task_id: &str,
        output_data: serde_json::Value,
    ) -> RiberryResult<()> {
        let mut task = self.find(external_task_id).await?.ok_or_else(|| {
            RiberryError::ExternalTaskNotFound {
                external_task_id: external_task_id.to_string(),
            }
        })?;
        task.status = ExternalTaskStatus::Ready;
        task.output_data = Some(output_data);
        self.repos.external_tasks.update(&task).await?;
        info!(external_task_id = %external_task_id, "外部任务已就绪");
        Ok(())
    }

    /// 检查外部任务的接收任务消息
    pub fn receiver_message(external_task_id: &str, validator: Option<&str>) -> TaskMessage {
        TaskMessage::new(
            CHECK_EXTERNAL_TASK,
            json!({
                "external_task_id": external_task_id,
                "validator": validator,
            }),
        )
    }
}

/// 只在实例存在待处理的外部结果时订阅接收队列
pub struct ExternalTaskReceiver {
    repos: Repositories,
    instance_name: String,
    queue: String,
    consumer: Arc<dyn ConsumerControl>,
    interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl ExternalTaskReceiver {
    pub fn new(
        repos: Repositories,
        instance_name: impl Into<String>,
        queue: impl Into<String>,
        consumer: Arc<dyn ConsumerControl>,
    ) -> Self {
        Self {
            repos,
            instance_name: instance_name.into(),
            queue: queue.into(),
            consumer,
            interval: Duration::from_secs(1),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 返回检查后是否订阅了接收队列
    pub async fn check_once(&self) -> RiberryResult<bool> {
        let instance = self
            .repos
            .instances
            .find_by_internal_name(&self.instance_name)
            .await?
            .ok_or_else(|| RiberryError::InstanceNotFound {
                name: self.instance_name.clone(),
            })?;
        let pending = self
            .repos
            .external_tasks
            .has_ready_for_instance(instance.id)
            .await?;
        let subscribed = self.consumer.queues().await.contains(&self.queue);

        if pending && !subscribed {
            info!(queue = %self.queue, "存在待处理的外部结果，订阅接收队列");
            self.consumer.add_queue(&self.queue).await;
        } else if !pending && subscribed {
            debug!(queue = %self.queue, "没有待处理的外部结果，取消订阅接收队列");
            self.consumer.cancel_queue(&self.queue).await;
        }
        Ok(pending)
    }

    pub fn spawn(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            *self.running.write().await = true;
            info!(queue = %self.queue, "启动外部任务接收循环");

            let mut interval = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.check_once().await {
                            error!("检查外部任务失败: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("外部任务接收循环收到关闭信号");
                        break;
                    }
                }
            }

            *self.running.write().await = false;
        })
    }
}

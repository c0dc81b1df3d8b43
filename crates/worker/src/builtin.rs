//! 每个工作进程都注册的内部任务

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use riberry_core::{RiberryResult, CHECK_EXTERNAL_TASK, ENTRY_POINT_TASK, EXECUTION_COMPLETE_TASK};
use riberry_dispatcher::ExecutionTracker;
use riberry_domain::{ExecutionStatus, ExternalTaskStatus};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::app::EntryPoint;
use crate::context::TaskContext;
use crate::events::{EventRegistry, HandlerOutcome, RegistryEvent};
use crate::task::{RetryLimit, TaskError, TaskHandler, TaskOptions, TaskRegistry, TaskResult};

/// 外部任务未就绪时的重试间隔
const EXTERNAL_RETRY_COUNTDOWN: Duration = Duration::from_secs(1);

/// 把执行置为 ACTIVE 后运行应用入口
pub struct EntryPointTask {
    entry_points: Arc<BTreeMap<String, EntryPoint>>,
}

impl EntryPointTask {
    pub fn new(entry_points: Arc<BTreeMap<String, EntryPoint>>) -> Self {
        Self { entry_points }
    }
}

#[async_trait]
impl TaskHandler for EntryPointTask {
    async fn run(&self, ctx: &TaskContext) -> TaskResult {
        let execution_id: i64 = ctx.arg("execution_id")?;
        let name: String = ctx.arg("entry_point")?;
        let entry_point = self.entry_points.get(&name).ok_or_else(|| {
            TaskError::raised("KeyError", format!("应用中没有入口 {name}"))
        })?;

        ctx.lifecycle()
            .execution_started(execution_id, &ctx.root_id, &entry_point.stream)
            .await?;
        info!(execution_id, entry_point = %name, "运行应用入口");
        entry_point.handler.run(ctx).await
    }
}

/// 入口任务的成功/失败回调
pub struct ExecutionCompleteTask {
    tracker: Option<ExecutionTracker>,
}

impl ExecutionCompleteTask {
    pub fn new(tracker: Option<ExecutionTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl TaskHandler for ExecutionCompleteTask {
    async fn run(&self, ctx: &TaskContext) -> TaskResult {
        let status: ExecutionStatus = ctx.arg("status")?;
        let stream: Option<String> = ctx.arg("stream")?;

        let completed = ctx
            .lifecycle()
            .execution_complete(&ctx.root_id, status, stream.as_deref())
            .await?;
        if let Some(tracker) = &self.tracker {
            tracker.untrack(ctx.instance_name(), &ctx.root_id).await?;
        }
        Ok(Value::Bool(completed))
    }
}

/// 检查外部任务是否就绪并交给验证器
pub struct CheckExternalTask {
    events: Arc<EventRegistry>,
}

impl CheckExternalTask {
    pub fn new(events: Arc<EventRegistry>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl TaskHandler for CheckExternalTask {
    async fn run(&self, ctx: &TaskContext) -> TaskResult {
        let external_task_id: String = ctx.arg("external_task_id")?;
        let validator: Option<String> = ctx.arg("validator")?;
        let repo = &ctx.lifecycle().repositories().external_tasks;

        let Some(task) = repo.find_by_external_id(&external_task_id).await? else {
            warn!(external_task_id = %external_task_id, "外部任务不存在");
            return Ok(Value::Null);
        };

        match task.status {
            ExternalTaskStatus::Waiting => Err(TaskError::retry(
                "外部任务尚未就绪",
                EXTERNAL_RETRY_COUNTDOWN,
            )),
            ExternalTaskStatus::Complete => Ok(task.output_data.unwrap_or(Value::Null)),
            ExternalTaskStatus::Ready => {
                let output = task.output_data.clone().unwrap_or(Value::Null);
                let event = RegistryEvent::ExternalResult {
                    task: task.clone(),
                    validator: validator.unwrap_or_default(),
                };
                let outcomes = self
                    .events
                    .call(&event)
                    .await
                    .into_iter()
                    .collect::<RiberryResult<Vec<_>>>()?;
                if outcomes.len() > 1 {
                    return Err(TaskError::raised(
                        "AssertionError",
                        format!("验证器 {} 触发了多个回调", event.key()),
                    ));
                }

                if let Some(HandlerOutcome::Retry { input_data }) = outcomes.into_iter().next() {
                    repo.transition(
                        &external_task_id,
                        ExternalTaskStatus::Ready,
                        ExternalTaskStatus::Waiting,
                        input_data,
                        None,
                    )
                    .await?;
                    debug!(external_task_id = %external_task_id, "外部结果未通过验证，重新等待");
                    return Err(TaskError::retry("外部结果未通过验证", EXTERNAL_RETRY_COUNTDOWN));
                }

                repo.transition(
                    &external_task_id,
                    ExternalTaskStatus::Ready,
                    ExternalTaskStatus::Complete,
                    None,
                    None,
                )
                .await?;
                info!(external_task_id = %external_task_id, "外部任务已完成");
                Ok(output)
            }
        }
    }
}

/// 注册内部任务：入口任务受执行流管理，另外两个不受管理
pub fn register_builtin_tasks(
    tasks: &mut TaskRegistry,
    entry_points: Arc<BTreeMap<String, EntryPoint>>,
    events: Arc<EventRegistry>,
    tracker: Option<ExecutionTracker>,
) -> RiberryResult<()> {
    tasks.register(
        ENTRY_POINT_TASK,
        Arc::new(EntryPointTask::new(entry_points)),
        TaskOptions::default(),
    )?;
    tasks.register_unmanaged(
        EXECUTION_COMPLETE_TASK,
        Arc::new(ExecutionCompleteTask::new(tracker)),
        TaskOptions::default(),
    )?;
    tasks.register_unmanaged(
        CHECK_EXTERNAL_TASK,
        Arc::new(CheckExternalTask::new(events)),
        TaskOptions::default().max_retries(RetryLimit::Unlimited),
    )?;
    Ok(())
}

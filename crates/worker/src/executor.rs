//! 任务执行器
//!
//! 在执行流生命周期内运行一次任务调用：先发出开始事件，运行用户代码，按结果分类
//! （成功、重试、替代结果、失败），再发出终态事件并发布回调。

use std::sync::Arc;
use std::time::{Duration, Instant};

use riberry_core::{config::TransportConfig, RiberryResult, TaskMessage};
use riberry_domain::{ErrorReport, ExecutionStatus};
use riberry_infrastructure::observability::{TASKS_EXECUTED, TASK_DURATION, TASK_RETRIES};
use tracing::{debug, error, info, instrument, warn};

use crate::context::{TaskContext, WorkerServices};
use crate::emitter::TaskState;
use crate::flow;
use crate::task::{RegisteredTask, TaskError, TaskRegistry, TaskResult};

/// 一次调用的结果
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Succeeded(serde_json::Value),
    /// 用户代码失败，已使用替代结果
    Intercepted(serde_json::Value),
    Retried { retries: u32, countdown: Duration },
    Failed { error_type: String, message: String },
    Ignored,
    /// 作业执行已结束或不存在，未运行用户代码
    Refused,
    Unregistered,
}

impl TaskOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Succeeded(_) => "success",
            TaskOutcome::Intercepted(_) => "intercepted",
            TaskOutcome::Retried { .. } => "retry",
            TaskOutcome::Failed { .. } => "failure",
            TaskOutcome::Ignored => "ignored",
            TaskOutcome::Refused => "refused",
            TaskOutcome::Unregistered => "unregistered",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub default_retry_delay: Duration,
    pub default_max_retries: u32,
    pub soft_time_limit: Option<Duration>,
    pub time_limit: Option<Duration>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

impl From<&TransportConfig> for ExecutorSettings {
    fn from(config: &TransportConfig) -> Self {
        Self {
            default_retry_delay: Duration::from_secs(config.default_retry_delay_seconds),
            default_max_retries: config.default_max_retries,
            soft_time_limit: config.soft_time_limit_seconds.map(Duration::from_secs),
            time_limit: config.time_limit_seconds.map(Duration::from_secs),
        }
    }
}

pub struct TaskExecutor {
    tasks: TaskRegistry,
    services: Arc<WorkerServices>,
    settings: ExecutorSettings,
}

impl TaskExecutor {
    pub fn new(tasks: TaskRegistry, services: Arc<WorkerServices>, settings: ExecutorSettings) -> Self {
        Self {
            tasks,
            services,
            settings,
        }
    }

    pub fn services(&self) -> &Arc<WorkerServices> {
        &self.services
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    #[instrument(skip_all, fields(task = %message.task_name, task_id = %message.id, root_id = %message.root_id))]
    pub async fn execute(&self, message: TaskMessage) -> TaskOutcome {
        let started = Instant::now();
        let outcome = match self.tasks.get(&message.task_name) {
            Some(task) if task.managed => self.execute_managed(task, &message).await,
            Some(task) => self.execute_unmanaged(task, &message).await,
            None => {
                error!("未注册的任务，丢弃消息");
                TaskOutcome::Unregistered
            }
        };

        metrics::counter!(TASKS_EXECUTED, "outcome" => outcome.label()).increment(1);
        metrics::histogram!(TASK_DURATION).record(started.elapsed().as_secs_f64());
        debug!(outcome = outcome.label(), elapsed_ms = started.elapsed().as_millis() as u64, "任务调用结束");
        outcome
    }

    async fn execute_unmanaged(&self, task: &RegisteredTask, message: &TaskMessage) -> TaskOutcome {
        let ctx = TaskContext::from_message(message, self.services.clone());
        match self.run_with_limits(task, &ctx).await {
            Ok(value) => {
                self.publish_callbacks(message, &message.link).await;
                TaskOutcome::Succeeded(value)
            }
            Err(e) if self.should_retry(task, message, &e) => self.retry(task, message, &e).await,
            Err(e) => {
                error!("内部任务执行失败: {}", e);
                self.publish_callbacks(message, &message.link_error).await;
                TaskOutcome::Failed {
                    error_type: e.error_type().to_string(),
                    message: e.message(),
                }
            }
        }
    }

    async fn execute_managed(&self, task: &RegisteredTask, message: &TaskMessage) -> TaskOutcome {
        let ctx = TaskContext::from_message(message, self.services.clone());

        match ctx.execution().await {
            Ok(execution) if execution.is_terminal() => {
                warn!(execution_id = execution.id, "作业执行已结束，拒绝运行任务");
                self.publish_callbacks(message, &message.link_error).await;
                return TaskOutcome::Refused;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("无法确定所属的作业执行，拒绝运行任务: {}", e);
                self.publish_callbacks(message, &message.link_error).await;
                return TaskOutcome::Refused;
            }
        }

        let result = match self.services.emitter.task_prerun(&ctx).await {
            Ok(()) => self.run_with_limits(task, &ctx).await,
            Err(e) => Err(TaskError::Riberry(e)),
        };

        let (state, outcome) = match result {
            Ok(value) => (TaskState::Success, TaskOutcome::Succeeded(value)),
            Err(TaskError::Ignore) => (TaskState::Ignored, TaskOutcome::Ignored),
            Err(e) if self.should_retry(task, message, &e) => {
                return self.retry(task, message, &e).await;
            }
            Err(e) => self.handle_failure(task, &ctx, e).await,
        };

        if state == TaskState::Failure {
            if let Err(e) = self
                .services
                .lifecycle
                .execution_complete(&ctx.root_id, ExecutionStatus::Failure, None)
                .await
            {
                error!("标记作业执行失败时出错: {}", e);
            }
        }

        if let Err(e) = self.services.emitter.task_postrun(&ctx, state).await {
            error!("发出任务终态事件失败: {}", e);
        }

        match state {
            TaskState::Success => match ctx.take_replacement().await {
                Some(replacement) => {
                    if let Some(head) =
                        flow::chain(replacement, message.link.clone(), message.link_error.clone())
                    {
                        self.publish_callbacks(message, &[head]).await;
                    }
                }
                None => self.publish_callbacks(message, &message.link).await,
            },
            TaskState::Failure => self.publish_callbacks(message, &message.link_error).await,
            TaskState::Ignored => {}
        }

        outcome
    }

    async fn run_with_limits(&self, task: &RegisteredTask, ctx: &TaskContext) -> TaskResult {
        let run = task.handler.run(ctx);
        match (self.settings.soft_time_limit, self.settings.time_limit) {
            (Some(soft), _) => tokio::time::timeout(soft, run)
                .await
                .unwrap_or(Err(TaskError::SoftTimeLimitExceeded)),
            (None, Some(hard)) => tokio::time::timeout(hard, run)
                .await
                .unwrap_or(Err(TaskError::TimeLimitExceeded)),
            (None, None) => run.await,
        }
    }

    fn should_retry(&self, task: &RegisteredTask, message: &TaskMessage, error: &TaskError) -> bool {
        task.options.is_retry_class(error)
            && !task.options.retries_exhausted(
                message.retries,
                message.max_retries,
                self.settings.default_max_retries,
            )
    }

    async fn retry(&self, task: &RegisteredTask, message: &TaskMessage, error: &TaskError) -> TaskOutcome {
        let countdown = error
            .countdown()
            .or(task.options.retry_delay)
            .unwrap_or(self.settings.default_retry_delay);
        let retried = message.retry_message(
            chrono::Duration::from_std(countdown).unwrap_or_else(|_| chrono::Duration::zero()),
        );
        let queue = self.services.router.queue_for(message);

        metrics::counter!(TASK_RETRIES, "task" => message.task_name.clone()).increment(1);
        info!(
            retries = retried.retries,
            countdown_ms = countdown.as_millis() as u64,
            "任务将重试: {}",
            error
        );

        if let Err(e) = self
            .services
            .transport
            .publish_delayed(&queue, &retried, countdown)
            .await
        {
            error!("发布重试消息失败: {}", e);
        }

        TaskOutcome::Retried {
            retries: retried.retries,
            countdown,
        }
    }

    /// 非重试路径：有替代结果时记录为 Intercepted，否则记录为 Fatal
    async fn handle_failure(
        &self,
        task: &RegisteredTask,
        ctx: &TaskContext,
        error: TaskError,
    ) -> (TaskState, TaskOutcome) {
        let report = ErrorReport::new(error.error_type(), error.message())
            .with_traceback(error.traceback());
        let failed = TaskOutcome::Failed {
            error_type: report.error_type.clone(),
            message: report.message.clone(),
        };

        let fallback = match &task.options.fallback {
            Some(fallback) if !error.is_time_limit() => fallback,
            _ => {
                error!("任务执行失败: {}", error);
                self.record_error(ctx, &report, "Fatal").await;
                return (TaskState::Failure, failed);
            }
        };

        match fallback.resolve() {
            Ok(value) => {
                warn!("任务执行失败，使用替代结果: {}", error);
                self.record_error(ctx, &report, "Intercepted").await;
                (TaskState::Success, TaskOutcome::Intercepted(value))
            }
            Err(reason) => {
                error!("任务执行失败，替代结果也失败: {} / {}", error, reason);
                self.record_error(ctx, &report, "Fatal (intercept failed)")
                    .await;
                (TaskState::Failure, failed)
            }
        }
    }

    async fn record_error(&self, ctx: &TaskContext, report: &ErrorReport, category: &str) {
        if let Err(e) = ctx.artifact_from_error(report, category).await {
            error!("记录错误产物失败: {}", e);
        }
    }

    async fn publish_callbacks(&self, message: &TaskMessage, callbacks: &[TaskMessage]) {
        for callback in callbacks {
            let callback = callback.clone().with_root(message.root_id.clone());
            if let Err(e) = self.publish(&message.root_id, &callback).await {
                error!(callback = %callback.task_name, "发布回调任务失败: {}", e);
            }
        }
    }

    async fn publish(&self, root_id: &str, message: &TaskMessage) -> RiberryResult<()> {
        self.services.publish(root_id, message).await
    }
}

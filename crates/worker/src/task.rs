//! 任务定义与注册表

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use riberry_core::{RiberryError, RiberryResult};
use thiserror::Error;

use crate::context::TaskContext;

/// 用户任务返回的错误
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{error_type}: {message}")]
    Raised {
        error_type: String,
        message: String,
        traceback: Option<String>,
    },

    /// 主动请求重试
    #[error("请求重试: {reason}")]
    Retry {
        reason: String,
        countdown: Option<Duration>,
    },

    /// 放弃本次执行，不触发回调
    #[error("任务被忽略")]
    Ignore,

    #[error("任务超过软超时")]
    SoftTimeLimitExceeded,

    #[error("任务超过硬超时")]
    TimeLimitExceeded,

    #[error(transparent)]
    Riberry(#[from] RiberryError),
}

impl TaskError {
    pub fn raised(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        TaskError::Raised {
            error_type: error_type.into(),
            message: message.into(),
            traceback: None,
        }
    }

    pub fn retry(reason: impl Into<String>, countdown: Duration) -> Self {
        TaskError::Retry {
            reason: reason.into(),
            countdown: Some(countdown),
        }
    }

    /// 用于重试分类与产物标签的错误类型名
    pub fn error_type(&self) -> &str {
        match self {
            TaskError::Raised { error_type, .. } => error_type,
            TaskError::Retry { .. } => "Retry",
            TaskError::Ignore => "Ignore",
            TaskError::SoftTimeLimitExceeded => "SoftTimeLimitExceeded",
            TaskError::TimeLimitExceeded => "TimeLimitExceeded",
            TaskError::Riberry(_) => "RiberryError",
        }
    }

    pub fn is_time_limit(&self) -> bool {
        matches!(
            self,
            TaskError::SoftTimeLimitExceeded | TaskError::TimeLimitExceeded
        )
    }

    pub fn countdown(&self) -> Option<Duration> {
        match self {
            TaskError::Retry { countdown, .. } => *countdown,
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            TaskError::Raised { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn traceback(&self) -> String {
        match self {
            TaskError::Raised {
                traceback: Some(traceback),
                ..
            } => traceback.clone(),
            other => format!("{}: {}", other.error_type(), other.message()),
        }
    }
}

pub type TaskResult = Result<serde_json::Value, TaskError>;

/// 一个可执行的任务
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: &TaskContext) -> TaskResult;
}

/// 以闭包实现的任务
pub struct FnTask<F>(F);

#[async_trait]
impl<F> TaskHandler for FnTask<F>
where
    F: Fn(TaskContext) -> BoxFuture<'static, TaskResult> + Send + Sync,
{
    async fn run(&self, ctx: &TaskContext) -> TaskResult {
        (self.0)(ctx.clone()).await
    }
}

/// 把 `|ctx| Box::pin(async move { ... })` 形式的闭包包装为任务
pub fn task_fn<F>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext) -> BoxFuture<'static, TaskResult> + Send + Sync + 'static,
{
    Arc::new(FnTask(f))
}

/// 最大重试次数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryLimit {
    /// 使用传输配置中的默认值
    #[default]
    Default,
    Limited(u32),
    Unlimited,
}

/// 失败时替代的结果
#[derive(Clone)]
pub enum Fallback {
    Value(serde_json::Value),
    Compute(Arc<dyn Fn() -> Result<serde_json::Value, String> + Send + Sync>),
}

impl Fallback {
    pub fn resolve(&self) -> Result<serde_json::Value, String> {
        match self {
            Fallback::Value(value) => Ok(value.clone()),
            Fallback::Compute(f) => f(),
        }
    }
}

impl fmt::Debug for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Fallback::Compute(_) => f.write_str("Compute(..)"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// 这些错误类型触发重试
    pub retry_for: Vec<String>,
    pub max_retries: RetryLimit,
    pub retry_delay: Option<Duration>,
    pub fallback: Option<Fallback>,
}

impl TaskOptions {
    pub fn retry_for(mut self, error_type: impl Into<String>) -> Self {
        self.retry_for.push(error_type.into());
        self
    }

    pub fn max_retries(mut self, limit: RetryLimit) -> Self {
        self.max_retries = limit;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// 主动重试总是属于重试类，超时只有在 `retry_for` 中列出时才重试
    pub fn is_retry_class(&self, error: &TaskError) -> bool {
        match error {
            TaskError::Retry { .. } => true,
            TaskError::Ignore => false,
            other => self.retry_for.iter().any(|t| t == other.error_type()),
        }
    }

    pub fn retries_exhausted(&self, retries: u32, message_max: Option<u32>, default_max: u32) -> bool {
        match self.max_retries {
            RetryLimit::Unlimited => false,
            RetryLimit::Limited(max) => retries >= max,
            RetryLimit::Default => retries >= message_max.unwrap_or(default_max),
        }
    }
}

#[derive(Clone)]
pub struct RegisteredTask {
    pub name: String,
    pub handler: Arc<dyn TaskHandler>,
    pub options: TaskOptions,
    /// 受执行流生命周期管理；内部回调任务不受管理
    pub managed: bool,
}

/// 任务名 -> 任务
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, RegisteredTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        options: TaskOptions,
    ) -> RiberryResult<()> {
        self.insert(name.into(), handler, options, true)
    }

    pub fn register_unmanaged(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        options: TaskOptions,
    ) -> RiberryResult<()> {
        self.insert(name.into(), handler, options, false)
    }

    fn insert(
        &mut self,
        name: String,
        handler: Arc<dyn TaskHandler>,
        options: TaskOptions,
        managed: bool,
    ) -> RiberryResult<()> {
        if self.tasks.contains_key(&name) {
            return Err(RiberryError::Configuration(format!("任务重复注册: {name}")));
        }
        self.tasks.insert(
            name.clone(),
            RegisteredTask {
                name,
                handler,
                options,
                managed,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTask> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }
}

//! 作业执行的生命周期动作
//!
//! 状态迁移直接写入存储，流程进度与通知以事件形式追加，由事件摄取器折叠。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use riberry_core::{RiberryError, RiberryResult};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::entities::{Event, JobExecution, JobExecutionArtifact, NewEvent};
use crate::events::{notify_types, ArtifactEventData, CustomEmail};
use crate::repositories::Repositories;
use crate::value_objects::{ArtifactType, ExecutionStatus, StreamStatus};

/// 事件的归属
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventOrigin {
    pub root_id: String,
    pub task_id: String,
    pub stream: Option<String>,
}

impl EventOrigin {
    /// 以根任务身份发出的事件
    pub fn root(root_id: impl Into<String>) -> Self {
        let root_id = root_id.into();
        Self {
            task_id: root_id.clone(),
            root_id,
            stream: None,
        }
    }
}

/// 待创建的产物
#[derive(Debug, Clone, PartialEq)]
pub struct NewArtifact {
    pub filename: String,
    pub content: Vec<u8>,
    pub name: Option<String>,
    pub artifact_type: ArtifactType,
    pub category: Option<String>,
    pub data: serde_json::Map<String, serde_json::Value>,
    /// 覆盖事件归属的执行流
    pub stream: Option<String>,
}

impl NewArtifact {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            name: None,
            artifact_type: ArtifactType::Output,
            category: None,
            data: serde_json::Map::new(),
            stream: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn of_type(mut self, artifact_type: ArtifactType) -> Self {
        self.artifact_type = artifact_type;
        self
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_tag(mut self, title: impl Into<String>, description: impl Into<String>) -> Self {
        self.data
            .insert(title.into(), serde_json::Value::String(description.into()));
        self
    }
}

/// 用户代码抛出的错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub error_type: String,
    pub message: String,
    pub traceback: String,
}

impl ErrorReport {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        let error_type = error_type.into();
        let message = message.into();
        Self {
            traceback: format!("{error_type}: {message}"),
            error_type,
            message,
        }
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = traceback.into();
        self
    }
}

/// 执行完成时的回调
#[async_trait]
pub trait CompletionHook: Send + Sync {
    async fn on_completion(
        &self,
        execution: &JobExecution,
        status: ExecutionStatus,
    ) -> RiberryResult<()>;
}

#[derive(Clone)]
pub struct ExecutionLifecycle {
    repos: Repositories,
    completion_hook: Option<Arc<dyn CompletionHook>>,
}

impl ExecutionLifecycle {
    pub fn new(repos: Repositories) -> Self {
        Self {
            repos,
            completion_hook: None,
        }
    }

    pub fn with_completion_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.completion_hook = Some(hook);
        self
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub async fn emit(&self, event: NewEvent) -> RiberryResult<Event> {
        debug!(name = %event.name, root_id = %event.root_id, task_id = %event.task_id, "追加事件");
        self.repos.events.append(&event).await
    }

    /// `READY -> ACTIVE`，并发出主执行流的 ACTIVE 事件与开始通知
    #[instrument(skip(self), fields(execution_id = %execution_id, root_id = %root_id))]
    pub async fn execution_started(
        &self,
        execution_id: i64,
        root_id: &str,
        primary_stream: &str,
    ) -> RiberryResult<JobExecution> {
        let execution = self
            .repos
            .executions
            .find_by_id(execution_id)
            .await?
            .ok_or(RiberryError::ExecutionNotFound { id: execution_id })?;

        if execution.is_terminal() {
            return Err(RiberryError::ExecutionComplete {
                root_id: root_id.to_string(),
            });
        }

        let now = Utc::now();
        if self.repos.executions.mark_active(execution_id, now).await? {
            self.emit(NewEvent::stream(
                root_id,
                root_id,
                primary_stream,
                StreamStatus::Active,
            ))
            .await?;
            self.emit(NewEvent::workflow_started(root_id, root_id, execution_id))
                .await?;
            info!("作业执行已开始");
        } else {
            debug!("作业执行已处于 {}，忽略重复的开始请求", execution.status);
        }

        self.repos
            .executions
            .find_by_id(execution_id)
            .await?
            .ok_or(RiberryError::ExecutionNotFound { id: execution_id })
    }

    /// 将作业执行置为终态；未知或已结束的执行会被忽略
    #[instrument(skip(self), fields(root_id = %root_id, status = %status))]
    pub async fn execution_complete(
        &self,
        root_id: &str,
        status: ExecutionStatus,
        stream: Option<&str>,
    ) -> RiberryResult<bool> {
        if !status.is_terminal() {
            return Err(RiberryError::InvalidTransition {
                from: "ACTIVE".to_string(),
                to: status.to_string(),
            });
        }

        let Some(execution) = self.repos.executions.find_by_task_id(root_id).await? else {
            warn!("根任务对应的作业执行不存在，跳过完成处理");
            return Ok(false);
        };

        if execution.is_terminal() {
            debug!("作业执行已是终态 {}，跳过", execution.status);
            return Ok(false);
        }

        if let Some(hook) = &self.completion_hook {
            if let Err(e) = hook.on_completion(&execution, status).await {
                error!("触发完成回调时出错: {}", e);
            }
        }

        let now = Utc::now();
        if !self
            .repos
            .executions
            .mark_complete(execution.id, status, now)
            .await?
        {
            debug!("作业执行已被并发置为终态");
            return Ok(false);
        }

        let stream_name = match stream {
            Some(name) => Some(name.to_string()),
            None => self
                .repos
                .streams
                .find_stream_by_task_id(root_id)
                .await?
                .map(|s| s.name),
        };

        if let Some(stream_name) = stream_name {
            self.emit(NewEvent::stream(
                root_id,
                root_id,
                &stream_name,
                StreamStatus::from(status),
            ))
            .await?;
        }

        self.emit(NewEvent::workflow_complete(root_id, root_id, status))
            .await?;

        metrics::counter!("riberry_executions_completed_total", "status" => status.as_str())
            .increment(1);
        info!(execution_id = execution.id, "作业执行已结束");
        Ok(true)
    }

    /// 以事件形式创建产物
    pub async fn create_artifact(
        &self,
        origin: &EventOrigin,
        artifact: NewArtifact,
    ) -> RiberryResult<Event> {
        let payload = ArtifactEventData {
            name: artifact.name,
            artifact_type: artifact.artifact_type,
            category: artifact.category,
            filename: artifact.filename,
            stream: artifact.stream.or_else(|| origin.stream.clone()),
            data: artifact.data,
        };

        self.emit(NewEvent::artifact(
            origin.root_id.clone(),
            origin.task_id.clone(),
            &payload,
            artifact.content,
        ))
        .await
    }

    /// 由错误生成产物，附带错误类型与错误信息标签
    pub async fn artifact_from_error(
        &self,
        origin: &EventOrigin,
        report: &ErrorReport,
        name: &str,
        category: &str,
        filename: &str,
    ) -> RiberryResult<Event> {
        let artifact = NewArtifact::new(filename, report.traceback.clone().into_bytes())
            .named(name)
            .of_type(ArtifactType::Error)
            .in_category(category)
            .with_tag("Error Type", report.error_type.clone())
            .with_tag("Error Message", report.message.clone());

        self.create_artifact(origin, artifact).await
    }

    /// 直接写入产物，用于没有任务上下文的场景
    pub async fn attach_artifact(
        &self,
        execution_id: i64,
        artifact: NewArtifact,
    ) -> RiberryResult<Option<JobExecutionArtifact>> {
        let record = JobExecutionArtifact {
            id: 0,
            job_execution_id: execution_id,
            stream_id: None,
            name: artifact.name.unwrap_or_else(|| "Untitled".to_string()),
            artifact_type: artifact.artifact_type,
            category: artifact.category.unwrap_or_else(|| "Default".to_string()),
            filename: artifact.filename,
            size: artifact.content.len() as i64,
            created: Utc::now(),
            binary: Some(artifact.content),
            data: Vec::new(),
            source_event_id: None,
        };
        self.repos.artifacts.create(&record).await
    }

    pub async fn notify(
        &self,
        origin: &EventOrigin,
        notification_type: &str,
        data: serde_json::Value,
    ) -> RiberryResult<Event> {
        self.emit(NewEvent::notify(
            origin.root_id.clone(),
            origin.task_id.clone(),
            notification_type,
            data,
        ))
        .await
    }

    pub async fn send_email(&self, origin: &EventOrigin, email: CustomEmail) -> RiberryResult<Event> {
        self.notify(origin, notify_types::CUSTOM_EMAIL, json!(email)).await
    }
}

//! 事件摄取
//!
//! 按 `(time, id)` 读取一批事件，按名称分组后依次交给 stream、step、artifact、notify
//! 处理器。处理成功或所属执行已不存在的事件被删除；其他错误的事件留到下一批。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use riberry_core::{config::EmailConfig, RiberryError, RiberryResult};
use riberry_domain::{
    event_names, notify_types, ArtifactEventData, CustomEmail, EmailMessage, EmailSender, Event,
    JobExecution, JobExecutionArtifact, JobExecutionStream, JobExecutionStreamStep,
    Notification, NotificationType, NotifyEventData, Repositories, StepEventData,
    StreamEventData, StreamStatus,
};
use riberry_infrastructure::observability::{EVENTS_MALFORMED, EVENTS_PROCESSED, EVENTS_RETAINED};
use tracing::{debug, error, info, instrument, warn};

use crate::loop_runner::PeriodicStep;

/// 事件摄取的锁槽位
pub const EVENTS_LOCK: &str = "step:events";

/// 一批事件的处理结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub applied: usize,
    pub dropped: usize,
    pub retained: usize,
}

pub struct EventIngestor {
    repos: Repositories,
    email_sender: Arc<dyn EmailSender>,
    email: EmailConfig,
    batch_limit: Option<u32>,
}

impl EventIngestor {
    pub fn new(
        repos: Repositories,
        email_sender: Arc<dyn EmailSender>,
        email: EmailConfig,
        batch_limit: Option<u32>,
    ) -> Self {
        Self {
            repos,
            email_sender,
            email,
            batch_limit,
        }
    }

    #[instrument(skip(self))]
    pub async fn process(&self) -> RiberryResult<IngestReport> {
        let events = self.repos.events.fetch_batch(self.batch_limit).await?;
        let mut report = IngestReport::default();
        if events.is_empty() {
            return Ok(report);
        }

        let mut to_delete = Vec::with_capacity(events.len());
        for name in event_names::ORDERED {
            for event in events.iter().filter(|e| e.name == name) {
                match self.handle(event).await {
                    Ok(()) => {
                        report.applied += 1;
                        to_delete.push(event.id);
                    }
                    Err(RiberryError::RootNotFound { root_id }) => {
                        debug!(event_id = event.id, root_id = %root_id, "事件无法归属，丢弃");
                        report.dropped += 1;
                        to_delete.push(event.id);
                    }
                    // 数据无法解析的事件重试也不会成功
                    Err(RiberryError::Serialization(e)) => {
                        warn!(event_id = event.id, name = %event.name, data = %event.data, "事件数据格式错误，丢弃: {}", e);
                        metrics::counter!(EVENTS_MALFORMED).increment(1);
                        report.dropped += 1;
                        to_delete.push(event.id);
                    }
                    Err(e) => {
                        error!(event_id = event.id, name = %event.name, "处理事件失败，保留到下一批: {}", e);
                        report.retained += 1;
                    }
                }
            }
        }

        let known: HashSet<&str> = event_names::ORDERED.into_iter().collect();
        for event in events.iter().filter(|e| !known.contains(e.name.as_str())) {
            warn!(event_id = event.id, name = %event.name, "未知的事件类型，丢弃");
            report.dropped += 1;
            to_delete.push(event.id);
        }

        self.repos.events.delete(&to_delete).await?;

        metrics::counter!(EVENTS_PROCESSED).increment(report.applied as u64);
        metrics::counter!(EVENTS_RETAINED).increment(report.retained as u64);
        info!(
            applied = report.applied,
            dropped = report.dropped,
            retained = report.retained,
            "事件批次处理完成"
        );
        Ok(report)
    }

    async fn handle(&self, event: &Event) -> RiberryResult<()> {
        match event.name.as_str() {
            event_names::STREAM => self.handle_stream(event).await,
            event_names::STEP => self.handle_step(event).await,
            event_names::ARTIFACT => self.handle_artifact(event).await,
            event_names::NOTIFY => self.handle_notify(event).await,
            other => Err(RiberryError::Internal(format!("未知的事件类型: {other}"))),
        }
    }

    async fn execution_for(&self, event: &Event) -> RiberryResult<JobExecution> {
        self.repos
            .executions
            .find_by_task_id(&event.root_id)
            .await?
            .ok_or_else(|| RiberryError::RootNotFound {
                root_id: event.root_id.clone(),
            })
    }

    async fn handle_stream(&self, event: &Event) -> RiberryResult<()> {
        let data: StreamEventData = serde_json::from_value(event.data.clone())?;
        let execution = self.execution_for(event).await?;
        let time = event.timestamp();

        let mut stream = match self.repos.streams.find_stream(execution.id, &data.stream).await? {
            Some(stream) => stream,
            None => {
                if let Some(existing) = self
                    .repos
                    .streams
                    .find_stream_by_task_id(&event.task_id)
                    .await?
                {
                    warn!(
                        event_id = event.id,
                        existing_stream = existing.id,
                        "任务ID已属于其他执行流，跳过事件"
                    );
                    return Ok(());
                }
                self.repos
                    .streams
                    .create_stream(&JobExecutionStream {
                        id: 0,
                        job_execution_id: execution.id,
                        name: data.stream.clone(),
                        task_id: event.task_id.clone(),
                        status: StreamStatus::Queued,
                        created: time,
                        started: None,
                        completed: None,
                        updated: time,
                    })
                    .await?
            }
        };

        if fold_state(&mut stream.timeline(), time, data.state) {
            self.repos.streams.update_stream(&stream).await?;
        }
        Ok(())
    }

    async fn handle_step(&self, event: &Event) -> RiberryResult<()> {
        let data: StepEventData = serde_json::from_value(event.data.clone())?;
        let execution = self.execution_for(event).await?;
        let time = event.timestamp();

        let stream = self
            .repos
            .streams
            .find_stream(execution.id, &data.stream)
            .await?
            .ok_or_else(|| RiberryError::StreamNotFound {
                task_id: event.task_id.clone(),
            })?;

        let mut step = match self.repos.streams.find_step(stream.id, &event.task_id).await? {
            Some(step) => step,
            None => {
                self.repos
                    .streams
                    .create_step(&JobExecutionStreamStep {
                        id: 0,
                        stream_id: stream.id,
                        name: data.step.clone(),
                        task_id: event.task_id.clone(),
                        status: StreamStatus::Queued,
                        created: time,
                        started: None,
                        completed: None,
                        updated: time,
                    })
                    .await?
            }
        };

        if fold_state(&mut step.timeline(), time, data.state) {
            self.repos.streams.update_step(&step).await?;
        }
        Ok(())
    }

    async fn handle_artifact(&self, event: &Event) -> RiberryResult<()> {
        let data: ArtifactEventData = serde_json::from_value(event.data.clone())?;
        let execution = self.execution_for(event).await?;

        let stream_id = match data.stream.as_deref() {
            Some(name) => match self.repos.streams.find_stream(execution.id, name).await? {
                Some(stream) => Some(stream.id),
                None => {
                    warn!(event_id = event.id, stream = %name, "产物的执行流不存在，按无执行流处理");
                    None
                }
            },
            None => None,
        };

        let binary = event.binary.clone().unwrap_or_default();
        let artifact = JobExecutionArtifact {
            id: 0,
            job_execution_id: execution.id,
            stream_id,
            name: data
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "Untitled".to_string()),
            artifact_type: data.artifact_type,
            category: data
                .category
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| "Default".to_string()),
            filename: data.filename.clone(),
            size: binary.len() as i64,
            created: event.timestamp(),
            binary: Some(binary),
            data: data.tags(),
            source_event_id: Some(event.id),
        };

        if self.repos.artifacts.create(&artifact).await?.is_none() {
            debug!(event_id = event.id, "产物已由同一事件写入过");
        }
        Ok(())
    }

    async fn handle_notify(&self, event: &Event) -> RiberryResult<()> {
        let data: NotifyEventData = serde_json::from_value(event.data.clone())?;
        let execution = self.execution_for(event).await?;

        match data.notification_type.as_str() {
            notify_types::WORKFLOW_STARTED => {
                let job_name = self.job_name(&execution).await?;
                let message = format!("Processing execution #{} for job {}", execution.id, job_name);
                let subject = format!("Riberry / Started / {} / execution #{}", job_name, execution.id);
                self.notify_creator(&execution, NotificationType::Info, message, subject, event.timestamp())
                    .await
            }
            notify_types::WORKFLOW_COMPLETE => {
                let status = data
                    .data
                    .get("status")
                    .and_then(|s| s.as_str())
                    .unwrap_or("FAILURE")
                    .to_lowercase();
                let job_name = self.job_name(&execution).await?;
                let message = format!(
                    "Completed execution #{} for job {} with status {}",
                    execution.id, job_name, status
                );
                let subject = format!(
                    "Riberry / {} / {} / execution #{}",
                    title_case(&status),
                    job_name,
                    execution.id
                );
                let notification_type = if status == "success" {
                    NotificationType::Success
                } else {
                    NotificationType::Error
                };
                self.notify_creator(&execution, notification_type, message, subject, event.timestamp())
                    .await
            }
            notify_types::CUSTOM_EMAIL => {
                let email: CustomEmail = serde_json::from_value(data.data)?;
                self.send_email(EmailMessage {
                    subject: email.subject,
                    body: email.body,
                    mime_type: email.mime_type.unwrap_or_else(|| "text/plain".to_string()),
                    sender: email.from.unwrap_or_else(|| self.email.sender.clone()),
                    recipients: email.to,
                })
                .await;
                Ok(())
            }
            other => {
                warn!(event_id = event.id, notification_type = %other, "未知的通知类型，忽略");
                Ok(())
            }
        }
    }

    async fn job_name(&self, execution: &JobExecution) -> RiberryResult<String> {
        Ok(self
            .repos
            .jobs
            .find_job(execution.job_id)
            .await?
            .map(|job| job.name)
            .unwrap_or_else(|| format!("#{}", execution.job_id)))
    }

    async fn notify_creator(
        &self,
        execution: &JobExecution,
        notification_type: NotificationType,
        message: String,
        subject: String,
        created: DateTime<Utc>,
    ) -> RiberryResult<()> {
        self.repos
            .notifications
            .create(&Notification {
                id: 0,
                user_id: execution.creator_id,
                notification_type,
                message: message.clone(),
                job_execution_id: Some(execution.id),
                created,
                read: false,
            })
            .await?;

        let Some(creator_id) = execution.creator_id else {
            return Ok(());
        };
        let recipient = self
            .repos
            .jobs
            .find_user(creator_id)
            .await?
            .and_then(|user| user.email);
        if let Some(recipient) = recipient {
            self.send_email(EmailMessage {
                subject,
                body: message,
                mime_type: "text/plain".to_string(),
                sender: self.email.sender.clone(),
                recipients: vec![recipient],
            })
            .await;
        }
        Ok(())
    }

    /// 邮件发送失败只记录日志
    async fn send_email(&self, message: EmailMessage) {
        if !self.email.enabled {
            debug!(subject = %message.subject, "邮件通知未启用");
            return;
        }
        if message.recipients.is_empty() {
            return;
        }
        if let Err(e) = self.email_sender.send(&message).await {
            warn!(subject = %message.subject, "发送邮件失败: {}", e);
        }
    }
}

#[async_trait]
impl PeriodicStep for EventIngestor {
    fn name(&self) -> &str {
        EVENTS_LOCK
    }

    async fn run_once(&self) -> RiberryResult<()> {
        self.process().await.map(|_| ())
    }
}

fn title_case(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// 执行流与步骤共有的时间线字段
struct Timeline<'a> {
    status: &'a mut StreamStatus,
    created: &'a mut DateTime<Utc>,
    started: &'a mut Option<DateTime<Utc>>,
    completed: &'a mut Option<DateTime<Utc>>,
    updated: &'a mut DateTime<Utc>,
}

trait HasTimeline {
    fn timeline(&mut self) -> Timeline<'_>;
}

impl HasTimeline for JobExecutionStream {
    fn timeline(&mut self) -> Timeline<'_> {
        Timeline {
            status: &mut self.status,
            created: &mut self.created,
            started: &mut self.started,
            completed: &mut self.completed,
            updated: &mut self.updated,
        }
    }
}

impl HasTimeline for JobExecutionStreamStep {
    fn timeline(&mut self) -> Timeline<'_> {
        Timeline {
            status: &mut self.status,
            created: &mut self.created,
            started: &mut self.started,
            completed: &mut self.completed,
            updated: &mut self.updated,
        }
    }
}

/// 把一次状态事件折叠进时间线，返回是否有变化
///
/// 状态只在 `time >= updated` 时生效，同一终态重复到达不产生变化；
/// `created` 与 `started` 取最早的时间，使乱序到达与顺序到达的结果一致。
fn fold_state(timeline: &mut Timeline<'_>, time: DateTime<Utc>, state: StreamStatus) -> bool {
    let mut changed = false;

    if time < *timeline.created {
        *timeline.created = time;
        changed = true;
    }

    if state == StreamStatus::Active && timeline.started.map_or(true, |s| time < s) {
        *timeline.started = Some(time);
        changed = true;
    }

    let repeated_terminal = timeline.status.is_terminal() && *timeline.status == state;
    if time >= *timeline.updated && !repeated_terminal {
        if *timeline.status != state || *timeline.updated != time {
            changed = true;
        }
        *timeline.status = state;
        *timeline.updated = time;
        if state.is_terminal() {
            *timeline.completed = Some(time);
            changed = true;
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn stream_at(time: DateTime<Utc>) -> JobExecutionStream {
        JobExecutionStream {
            id: 1,
            job_execution_id: 1,
            name: "Overall".into(),
            task_id: "root".into(),
            status: StreamStatus::Queued,
            created: time,
            started: None,
            completed: None,
            updated: time,
        }
    }

    #[test]
    fn test_in_order_fold() {
        let t0 = Utc::now();
        let mut stream = stream_at(t0);
        fold_state(&mut stream.timeline(), t0, StreamStatus::Queued);
        fold_state(&mut stream.timeline(), t0 + Duration::seconds(1), StreamStatus::Active);
        fold_state(&mut stream.timeline(), t0 + Duration::seconds(2), StreamStatus::Success);

        assert_eq!(stream.status, StreamStatus::Success);
        assert_eq!(stream.started, Some(t0 + Duration::seconds(1)));
        assert_eq!(stream.completed, Some(t0 + Duration::seconds(2)));
        assert!(stream.completed >= stream.started);
    }

    #[test]
    fn test_out_of_order_fold_matches_in_order() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(1);
        let t2 = t0 + Duration::seconds(2);

        let mut in_order = stream_at(t0);
        for (time, state) in [
            (t0, StreamStatus::Queued),
            (t1, StreamStatus::Active),
            (t2, StreamStatus::Success),
        ] {
            fold_state(&mut in_order.timeline(), time, state);
        }

        let mut reversed = stream_at(t2);
        for (time, state) in [
            (t2, StreamStatus::Success),
            (t1, StreamStatus::Active),
            (t0, StreamStatus::Queued),
        ] {
            fold_state(&mut reversed.timeline(), time, state);
        }

        assert_eq!(in_order, reversed);
    }

    #[test]
    fn test_repeated_event_is_noop() {
        let t0 = Utc::now();
        let mut stream = stream_at(t0);
        assert!(fold_state(&mut stream.timeline(), t0 + Duration::seconds(1), StreamStatus::Active));
        let snapshot = stream.clone();
        assert!(!fold_state(&mut stream.timeline(), t0 + Duration::seconds(1), StreamStatus::Active));
        assert_eq!(stream, snapshot);
    }

    #[test]
    fn test_terminal_state_applied_once() {
        let t0 = Utc::now();
        let mut stream = stream_at(t0);
        fold_state(&mut stream.timeline(), t0 + Duration::seconds(1), StreamStatus::Failure);
        assert!(!fold_state(&mut stream.timeline(), t0 + Duration::seconds(5), StreamStatus::Failure));
        assert_eq!(stream.completed, Some(t0 + Duration::seconds(1)));
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("success"), "Success");
        assert_eq!(title_case(""), "");
    }
}

//! 作业执行的传输层提交

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use riberry_core::{
    MessageQueue, RiberryError, RiberryResult, TaskMessage, TaskProperties, TaskRouter,
    ENTRY_POINT_TASK, EXECUTION_COMPLETE_TASK,
};
use riberry_domain::{ExecutionLifecycle, ExecutionStatus, Form, JobExecution, NewEvent, StreamStatus};
use serde_json::json;
use tracing::{debug, instrument, warn};

/// 把 READY 的执行交给工作进程
#[async_trait]
pub trait ExecutionLauncher: Send + Sync {
    async fn launch(&self, execution: &JobExecution, root_id: &str, form: &Form)
        -> RiberryResult<()>;
}

/// 通过消息传输提交入口任务
///
/// 入口任务附带成功/失败回调，二者都提交 `execution_complete`。
pub struct TransportLauncher {
    transport: Arc<dyn MessageQueue>,
    router: TaskRouter,
    lifecycle: ExecutionLifecycle,
    /// 入口名 -> 主执行流名
    entry_points: HashMap<String, String>,
}

impl TransportLauncher {
    pub fn new(
        transport: Arc<dyn MessageQueue>,
        router: TaskRouter,
        lifecycle: ExecutionLifecycle,
    ) -> Self {
        Self {
            transport,
            router,
            lifecycle,
            entry_points: HashMap::new(),
        }
    }

    pub fn with_entry_point(mut self, name: impl Into<String>, stream: impl Into<String>) -> Self {
        self.entry_points.insert(name.into(), stream.into());
        self
    }

    pub fn entry_message(
        execution: &JobExecution,
        root_id: &str,
        form: &Form,
        stream: &str,
    ) -> TaskMessage {
        let callback = |status: ExecutionStatus| {
            TaskMessage::new(
                EXECUTION_COMPLETE_TASK,
                json!({ "status": status, "stream": stream }),
            )
            .with_root(root_id)
            .with_priority(transport_priority(execution.priority))
        };

        TaskMessage::new(
            ENTRY_POINT_TASK,
            json!({
                "execution_id": execution.id,
                "form": form.internal_name,
                "entry_point": form.entry_point,
            }),
        )
        .with_id(root_id)
        .with_root(root_id)
        .with_priority(transport_priority(execution.priority))
        .with_properties(TaskProperties::stream(stream))
        .on_success(callback(ExecutionStatus::Success))
        .on_failure(callback(ExecutionStatus::Failure))
    }
}

#[async_trait]
impl ExecutionLauncher for TransportLauncher {
    #[instrument(skip_all, fields(execution_id = execution.id, root_id = %root_id))]
    async fn launch(
        &self,
        execution: &JobExecution,
        root_id: &str,
        form: &Form,
    ) -> RiberryResult<()> {
        let stream = self
            .entry_points
            .get(&form.entry_point)
            .ok_or_else(|| RiberryError::TaskNotRegistered(form.entry_point.clone()))?;

        let message = Self::entry_message(execution, root_id, form, stream);
        let queue = self.router.queue_for(&message);

        self.transport.publish_message(&queue, &message).await?;
        debug!(queue = %queue, "入口任务已提交");

        // 消息已在途，事件写入失败不影响执行
        if let Err(e) = self
            .lifecycle
            .emit(NewEvent::stream(root_id, root_id, stream, StreamStatus::Queued))
            .await
        {
            warn!("记录执行流 {} 的 QUEUED 事件失败: {}", stream, e);
        }
        Ok(())
    }
}

/// 执行优先级映射到传输层的 0..=9
pub fn transport_priority(priority: i32) -> u8 {
    priority.clamp(0, 9) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn form() -> Form {
        Form {
            id: 1,
            application_id: 1,
            instance_id: 1,
            name: "Monthly".into(),
            internal_name: "monthly".into(),
            entry_point: "monthly_report".into(),
        }
    }

    #[test]
    fn test_entry_message_carries_callbacks() {
        let mut execution = JobExecution::new(3, None, 64);
        execution.id = 11;
        execution.created = Utc::now();

        let message = TransportLauncher::entry_message(&execution, "root-1", &form(), "Overall");
        assert_eq!(message.id, "root-1");
        assert_eq!(message.root_id, "root-1");
        assert_eq!(message.task_name, ENTRY_POINT_TASK);
        assert_eq!(message.args["execution_id"], 11);
        assert_eq!(message.args["entry_point"], "monthly_report");
        assert_eq!(message.priority, 9);
        assert_eq!(message.properties.stream.as_deref(), Some("Overall"));

        assert_eq!(message.link.len(), 1);
        assert_eq!(message.link[0].args["status"], "SUCCESS");
        assert_eq!(message.link[0].root_id, "root-1");
        assert_eq!(message.link_error[0].args["status"], "FAILURE");
    }

    #[test]
    fn test_transport_priority_is_clamped() {
        assert_eq!(transport_priority(-3), 0);
        assert_eq!(transport_priority(4), 4);
        assert_eq!(transport_priority(255), 9);
    }
}

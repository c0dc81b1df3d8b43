use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 消息上携带的执行流属性
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProperties {
    pub stream: Option<String>,
    pub step: Option<String>,
    pub category: Option<String>,
    /// 该任务是执行流的第一个任务
    #[serde(default)]
    pub stream_start: bool,
    /// 该任务结束时需要发出执行流的终态事件
    #[serde(default)]
    pub stream_end: bool,
}

impl TaskProperties {
    pub fn stream(name: impl Into<String>) -> Self {
        Self {
            stream: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// 标记为独立执行流（同时开始与结束）
    pub fn standalone(mut self) -> Self {
        self.stream_start = true;
        self.stream_end = true;
        self
    }
}

/// 传输层任务消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// 任务ID，重试时保持不变
    pub id: String,
    /// 根任务ID，关联同一次作业执行的所有任务
    pub root_id: String,
    pub task_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub properties: TaskProperties,
    #[serde(default)]
    pub retries: u32,
    pub max_retries: Option<u32>,
    /// 0..=9，数值越大越先消费
    #[serde(default)]
    pub priority: u8,
    /// 覆盖路由规则的目标队列
    pub queue: Option<String>,
    pub eta: Option<DateTime<Utc>>,
    /// 成功回调
    #[serde(default)]
    pub link: Vec<TaskMessage>,
    /// 失败回调
    #[serde(default)]
    pub link_error: Vec<TaskMessage>,
    pub created_at: DateTime<Utc>,
}

pub const MAX_PRIORITY: u8 = 9;

impl TaskMessage {
    pub fn new(task_name: impl Into<String>, args: serde_json::Value) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            root_id: id.clone(),
            id,
            task_name: task_name.into(),
            args,
            properties: TaskProperties::default(),
            retries: 0,
            max_retries: None,
            priority: 0,
            queue: None,
            eta: None,
            link: Vec::new(),
            link_error: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_root(mut self, root_id: impl Into<String>) -> Self {
        self.root_id = root_id.into();
        self
    }

    pub fn with_properties(mut self, properties: TaskProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn on_success(mut self, callback: TaskMessage) -> Self {
        self.link.push(callback);
        self
    }

    pub fn on_failure(mut self, callback: TaskMessage) -> Self {
        self.link_error.push(callback);
        self
    }

    /// 构造重试消息：ID与根ID不变，重试计数加一
    pub fn retry_message(&self, countdown: chrono::Duration) -> Self {
        let mut message = self.clone();
        message.retries += 1;
        message.eta = Some(Utc::now() + countdown);
        message
    }

    /// 子任务继承根ID、优先级
    pub fn child(&self, task_name: impl Into<String>, args: serde_json::Value) -> Self {
        TaskMessage::new(task_name, args)
            .with_root(self.root_id.clone())
            .with_priority(self.priority)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.eta.map_or(true, |eta| eta <= now)
    }

    pub fn retries_exhausted(&self, default_max_retries: u32) -> bool {
        self.retries >= self.max_retries.unwrap_or(default_max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_message_is_its_own_root() {
        let message = TaskMessage::new("demo.task", json!({}));
        assert_eq!(message.id, message.root_id);
        assert_eq!(message.retries, 0);
        assert!(message.is_due(Utc::now()));
    }

    #[test]
    fn test_retry_keeps_identity() {
        let message = TaskMessage::new("demo.task", json!({"x": 1}))
            .with_root("root-1")
            .with_max_retries(2);
        let retried = message.retry_message(chrono::Duration::seconds(5));

        assert_eq!(retried.id, message.id);
        assert_eq!(retried.root_id, "root-1");
        assert_eq!(retried.retries, 1);
        assert!(!retried.is_due(Utc::now()));
        assert!(!retried.retries_exhausted(3));
        assert!(retried.retry_message(chrono::Duration::zero()).retries_exhausted(3));
    }

    #[test]
    fn test_priority_is_clamped() {
        let message = TaskMessage::new("demo.task", json!(null)).with_priority(200);
        assert_eq!(message.priority, MAX_PRIORITY);
    }

    #[test]
    fn test_callbacks_survive_serialization() {
        let callback = TaskMessage::new("riberry.core.execution_complete", json!({"status": "SUCCESS"}));
        let message = TaskMessage::new("riberry.core.app.entry_point", json!({}))
            .with_properties(TaskProperties::stream("Overall").standalone())
            .on_success(callback.clone());

        let encoded = serde_json::to_string(&message).unwrap();
        let decoded: TaskMessage = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.link, vec![callback]);
        assert!(decoded.properties.stream_start);
        assert!(decoded.properties.stream_end);
    }
}

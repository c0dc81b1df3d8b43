//! 事件日志的载荷格式

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::entities::{ArtifactData, NewEvent};
use crate::value_objects::{event_names, to_epoch, ArtifactType, ExecutionStatus, StreamStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEventData {
    pub stream: String,
    pub state: StreamStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepEventData {
    pub stream: String,
    pub step: String,
    pub state: StreamStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactEventData {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub category: Option<String>,
    pub filename: String,
    pub stream: Option<String>,
    /// 标题 -> 描述
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl ArtifactEventData {
    /// 只保留标题与描述都非空的标签
    pub fn tags(&self) -> Vec<ArtifactData> {
        self.data
            .iter()
            .filter_map(|(title, value)| {
                let description = match value {
                    serde_json::Value::Null => String::new(),
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if title.trim().is_empty() || description.trim().is_empty() {
                    None
                } else {
                    Some(ArtifactData {
                        title: title.clone(),
                        description,
                    })
                }
            })
            .collect()
    }
}

/// 通知事件的类型
pub mod notify_types {
    pub const WORKFLOW_STARTED: &str = "workflow_started";
    pub const WORKFLOW_COMPLETE: &str = "workflow_complete";
    pub const CUSTOM_EMAIL: &str = "custom-email";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifyEventData {
    #[serde(rename = "type")]
    pub notification_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// 自定义邮件载荷
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomEmail {
    pub subject: String,
    pub mime_type: Option<String>,
    pub body: String,
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
}

impl NewEvent {
    pub fn new(
        name: &str,
        root_id: impl Into<String>,
        task_id: impl Into<String>,
        data: serde_json::Value,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.to_string(),
            time: to_epoch(time),
            root_id: root_id.into(),
            task_id: task_id.into(),
            data,
            binary: None,
        }
    }

    pub fn stream(
        root_id: impl Into<String>,
        task_id: impl Into<String>,
        stream: &str,
        state: StreamStatus,
    ) -> Self {
        Self::new(
            event_names::STREAM,
            root_id,
            task_id,
            json!({ "stream": stream, "state": state }),
            Utc::now(),
        )
    }

    pub fn step(
        root_id: impl Into<String>,
        task_id: impl Into<String>,
        stream: &str,
        step: &str,
        state: StreamStatus,
    ) -> Self {
        Self::new(
            event_names::STEP,
            root_id,
            task_id,
            json!({ "stream": stream, "step": step, "state": state }),
            Utc::now(),
        )
    }

    pub fn artifact(
        root_id: impl Into<String>,
        task_id: impl Into<String>,
        data: &ArtifactEventData,
        content: Vec<u8>,
    ) -> Self {
        let mut event = Self::new(
            event_names::ARTIFACT,
            root_id,
            task_id,
            serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
            Utc::now(),
        );
        event.binary = Some(content);
        event
    }

    pub fn notify(
        root_id: impl Into<String>,
        task_id: impl Into<String>,
        notification_type: &str,
        data: serde_json::Value,
    ) -> Self {
        Self::new(
            event_names::NOTIFY,
            root_id,
            task_id,
            json!({ "type": notification_type, "data": data }),
            Utc::now(),
        )
    }

    pub fn workflow_complete(
        root_id: impl Into<String>,
        task_id: impl Into<String>,
        status: ExecutionStatus,
    ) -> Self {
        Self::notify(
            root_id,
            task_id,
            notify_types::WORKFLOW_COMPLETE,
            json!({ "status": status }),
        )
    }

    pub fn workflow_started(
        root_id: impl Into<String>,
        task_id: impl Into<String>,
        execution_id: i64,
    ) -> Self {
        Self::notify(
            root_id,
            task_id,
            notify_types::WORKFLOW_STARTED,
            json!({ "execution_id": execution_id }),
        )
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = to_epoch(time);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_tags_drop_blank_entries() {
        let mut data = serde_json::Map::new();
        data.insert("Error Type".to_string(), json!("ValueError"));
        data.insert("Error Message".to_string(), json!(""));
        data.insert("".to_string(), json!("orphan"));
        data.insert("Attempts".to_string(), json!(3));

        let payload = ArtifactEventData {
            name: None,
            artifact_type: ArtifactType::Error,
            category: None,
            filename: "x.log".to_string(),
            stream: None,
            data,
        };

        let tags = payload.tags();
        assert_eq!(tags.len(), 2);
        assert!(tags.iter().any(|t| t.title == "Attempts" && t.description == "3"));
        assert!(tags.iter().any(|t| t.title == "Error Type"));
    }

    #[test]
    fn test_stream_event_payload_shape() {
        let event = NewEvent::stream("root", "task", "Overall", StreamStatus::Active);
        assert_eq!(event.name, "stream");
        let data: StreamEventData = serde_json::from_value(event.data).unwrap();
        assert_eq!(data.stream, "Overall");
        assert_eq!(data.state, StreamStatus::Active);
    }

    #[test]
    fn test_workflow_complete_carries_status() {
        let event = NewEvent::workflow_complete("root", "root", ExecutionStatus::Failure);
        let data: NotifyEventData = serde_json::from_value(event.data).unwrap();
        assert_eq!(data.notification_type, notify_types::WORKFLOW_COMPLETE);
        assert_eq!(data.data["status"], "FAILURE");
    }
}

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{
    ArtifactType, DistributionStrategy, ExecutionStatus, ExternalTaskStatus, NotificationType,
    StreamStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Application {
    pub id: i64,
    pub name: String,
    pub internal_name: String,
    pub enabled: bool,
}

/// 部署单元
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationInstance {
    pub id: i64,
    pub application_id: i64,
    pub name: String,
    pub internal_name: String,
    /// 最近一次心跳时间
    pub heartbeat: Option<DateTime<Utc>>,
}

/// 时间窗口调度
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub id: i64,
    pub instance_id: i64,
    pub parameter: String,
    pub value: Option<String>,
    /// `*` 或逗号分隔的星期缩写，如 `mon,tue`
    pub days: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// `UTC` 或固定偏移，如 `+10:00`
    pub timezone: String,
    pub priority: i32,
}

impl Schedule {
    /// 全天生效的调度
    pub fn all_day(
        instance_id: i64,
        parameter: impl Into<String>,
        value: impl Into<String>,
        priority: i32,
    ) -> Self {
        Self {
            id: 0,
            instance_id,
            parameter: parameter.into(),
            value: Some(value.into()),
            days: "*".to_string(),
            start_time: NaiveTime::MIN,
            end_time: NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN),
            timezone: "UTC".to_string(),
            priority,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Form {
    pub id: i64,
    pub application_id: i64,
    pub instance_id: i64,
    pub name: String,
    pub internal_name: String,
    /// 调度器提交时使用的入口名
    pub entry_point: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: i64,
    pub form_id: i64,
    pub name: String,
    pub creator_id: Option<i64>,
    /// 输入值与文件的有序列表
    pub inputs: serde_json::Value,
    pub created: DateTime<Utc>,
}

/// 作业执行，生命周期实体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobExecution {
    pub id: i64,
    pub job_id: i64,
    pub creator_id: Option<i64>,
    pub task_id: Option<String>,
    pub status: ExecutionStatus,
    pub priority: i32,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
}

impl JobExecution {
    pub fn new(job_id: i64, creator_id: Option<i64>, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            job_id,
            creator_id,
            task_id: None,
            status: ExecutionStatus::Received,
            priority,
            created: now,
            started: None,
            completed: None,
            updated: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn entity_description(&self) -> String {
        format!("作业执行 #{} ({})", self.id, self.status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobExecutionStream {
    pub id: i64,
    pub job_execution_id: i64,
    pub name: String,
    pub task_id: String,
    pub status: StreamStatus,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobExecutionStreamStep {
    pub id: i64,
    pub stream_id: i64,
    pub name: String,
    pub task_id: String,
    pub status: StreamStatus,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactData {
    pub title: String,
    pub description: String,
}

/// 不可变的执行产物
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobExecutionArtifact {
    pub id: i64,
    pub job_execution_id: i64,
    pub stream_id: Option<i64>,
    pub name: String,
    pub artifact_type: ArtifactType,
    pub category: String,
    pub filename: String,
    pub size: i64,
    pub created: DateTime<Utc>,
    pub binary: Option<Vec<u8>>,
    pub data: Vec<ArtifactData>,
    /// 来源事件ID，保证同一事件只落库一次
    pub source_event_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalTask {
    pub id: i64,
    pub job_execution_id: i64,
    pub stream_id: Option<i64>,
    pub name: String,
    pub task_type: String,
    pub external_task_id: String,
    pub status: ExternalTaskStatus,
    pub input_data: Option<serde_json::Value>,
    pub output_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapacityProducer {
    pub id: i64,
    pub configuration_id: i64,
    pub name: String,
    pub internal_name: String,
    pub capacity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapacityConfiguration {
    pub id: i64,
    pub weight_parameter: String,
    pub capacity_parameter: String,
    pub producer_parameter: String,
    pub distribution_strategy: DistributionStrategy,
    pub producers: Vec<CapacityProducer>,
}

/// 追加写的事件记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: i64,
    pub name: String,
    /// Unix 秒
    pub time: f64,
    pub root_id: String,
    pub task_id: String,
    pub data: serde_json::Value,
    pub binary: Option<Vec<u8>>,
}

impl Event {
    pub fn timestamp(&self) -> DateTime<Utc> {
        crate::value_objects::from_epoch(self.time)
    }
}

/// 待写入的事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewEvent {
    pub name: String,
    pub time: f64,
    pub root_id: String,
    pub task_id: String,
    pub data: serde_json::Value,
    pub binary: Option<Vec<u8>>,
}

/// 每个作业执行的共享键值数据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceData {
    pub id: i64,
    pub resource_id: i64,
    pub name: String,
    pub value: Option<serde_json::Value>,
    /// 锁持有者（任务ID）
    pub lock: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub marked_for_refresh: bool,
}

impl ResourceData {
    pub fn is_locked_by(&self, holder: &str, now: DateTime<Utc>) -> bool {
        self.lock.as_deref() == Some(holder) && self.expiry.map_or(false, |e| e > now)
    }

    pub fn is_lock_free(&self, now: DateTime<Utc>) -> bool {
        self.lock.is_none() || self.expiry.map_or(true, |e| e <= now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: i64,
    pub user_id: Option<i64>,
    pub notification_type: NotificationType,
    pub message: String,
    pub job_execution_id: Option<i64>,
    pub created: DateTime<Utc>,
    pub read: bool,
}

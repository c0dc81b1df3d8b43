use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// 作业执行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    #[serde(rename = "RECEIVED")]
    Received,
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Received => "RECEIVED",
            ExecutionStatus::Ready => "READY",
            ExecutionStatus::Active => "ACTIVE",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failure => "FAILURE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Success | ExecutionStatus::Failure)
    }

    /// 状态只能单调前进，终态不可再变
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    fn rank(&self) -> u8 {
        match self {
            ExecutionStatus::Received => 0,
            ExecutionStatus::Ready => 1,
            ExecutionStatus::Active => 2,
            ExecutionStatus::Success | ExecutionStatus::Failure => 3,
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RECEIVED" => Ok(ExecutionStatus::Received),
            "READY" => Ok(ExecutionStatus::Ready),
            "ACTIVE" => Ok(ExecutionStatus::Active),
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "FAILURE" => Ok(ExecutionStatus::Failure),
            _ => Err(format!("Invalid execution status: {s}")),
        }
    }
}

/// 执行流与步骤状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StreamStatus {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "RETRY")]
    Retry,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Queued => "QUEUED",
            StreamStatus::Active => "ACTIVE",
            StreamStatus::Retry => "RETRY",
            StreamStatus::Success => "SUCCESS",
            StreamStatus::Failure => "FAILURE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamStatus::Success | StreamStatus::Failure)
    }
}

impl FromStr for StreamStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(StreamStatus::Queued),
            "ACTIVE" => Ok(StreamStatus::Active),
            "RETRY" => Ok(StreamStatus::Retry),
            "SUCCESS" => Ok(StreamStatus::Success),
            "FAILURE" => Ok(StreamStatus::Failure),
            _ => Err(format!("Invalid stream status: {s}")),
        }
    }
}

impl From<ExecutionStatus> for StreamStatus {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Received | ExecutionStatus::Ready => StreamStatus::Queued,
            ExecutionStatus::Active => StreamStatus::Active,
            ExecutionStatus::Success => StreamStatus::Success,
            ExecutionStatus::Failure => StreamStatus::Failure,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExternalTaskStatus {
    #[serde(rename = "WAITING")]
    Waiting,
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "COMPLETE")]
    Complete,
}

impl ExternalTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalTaskStatus::Waiting => "WAITING",
            ExternalTaskStatus::Ready => "READY",
            ExternalTaskStatus::Complete => "COMPLETE",
        }
    }
}

impl FromStr for ExternalTaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WAITING" => Ok(ExternalTaskStatus::Waiting),
            "READY" => Ok(ExternalTaskStatus::Ready),
            "COMPLETE" => Ok(ExternalTaskStatus::Complete),
            _ => Err(format!("Invalid external task status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ArtifactType {
    #[serde(rename = "output")]
    Output,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "report")]
    Report,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Output => "output",
            ArtifactType::Error => "error",
            ArtifactType::Report => "report",
        }
    }
}

impl FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "output" => Ok(ArtifactType::Output),
            "error" => Ok(ArtifactType::Error),
            "report" => Ok(ArtifactType::Report),
            _ => Err(format!(
                "Invalid artifact type: {s}. Supported types: output, error, report"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NotificationType {
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "warning")]
    Warning,
    #[serde(rename = "error")]
    Error,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Info => "info",
            NotificationType::Success => "success",
            NotificationType::Warning => "warning",
            NotificationType::Error => "error",
        }
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(NotificationType::Info),
            "success" => Ok(NotificationType::Success),
            "warning" => Ok(NotificationType::Warning),
            "error" => Ok(NotificationType::Error),
            _ => Err(format!("Invalid notification type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DistributionStrategy {
    #[serde(rename = "spread")]
    Spread,
    #[serde(rename = "binpack")]
    Binpack,
}

impl DistributionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionStrategy::Spread => "spread",
            DistributionStrategy::Binpack => "binpack",
        }
    }
}

impl FromStr for DistributionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spread" => Ok(DistributionStrategy::Spread),
            "binpack" => Ok(DistributionStrategy::Binpack),
            _ => Err(format!("Invalid distribution strategy: {s}")),
        }
    }
}

/// 应用实例的派生状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Created,
    Offline,
    Inactive,
    Online,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Created => "created",
            InstanceStatus::Offline => "offline",
            InstanceStatus::Inactive => "inactive",
            InstanceStatus::Online => "online",
        }
    }
}

macro_rules! impl_display_via_as_str {
    ($($ty:ty),* $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )*
    };
}

impl_display_via_as_str!(
    ExecutionStatus,
    StreamStatus,
    ExternalTaskStatus,
    ArtifactType,
    NotificationType,
    DistributionStrategy,
    InstanceStatus,
);

/// 事件名
pub mod event_names {
    pub const STREAM: &str = "stream";
    pub const STEP: &str = "step";
    pub const ARTIFACT: &str = "artifact";
    pub const NOTIFY: &str = "notify";

    /// 处理顺序固定
    pub const ORDERED: [&str; 4] = [STREAM, STEP, ARTIFACT, NOTIFY];
}

pub fn to_epoch(time: DateTime<Utc>) -> f64 {
    time.timestamp() as f64 + f64::from(time.timestamp_subsec_micros()) / 1_000_000.0
}

pub fn from_epoch(seconds: f64) -> DateTime<Utc> {
    let whole = seconds.floor();
    let micros = ((seconds - whole) * 1_000_000.0).round() as i64;
    Utc.timestamp_opt(whole as i64, 0)
        .single()
        .map(|t| t + chrono::Duration::microseconds(micros))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_status_is_frozen() {
        assert!(ExecutionStatus::Received.can_transition_to(ExecutionStatus::Ready));
        assert!(ExecutionStatus::Ready.can_transition_to(ExecutionStatus::Failure));
        assert!(ExecutionStatus::Active.can_transition_to(ExecutionStatus::Success));
        assert!(!ExecutionStatus::Active.can_transition_to(ExecutionStatus::Ready));
        assert!(!ExecutionStatus::Success.can_transition_to(ExecutionStatus::Failure));
        assert!(!ExecutionStatus::Failure.can_transition_to(ExecutionStatus::Active));
    }

    #[test]
    fn test_status_parsing_is_case_insensitive() {
        assert_eq!("success".parse::<StreamStatus>(), Ok(StreamStatus::Success));
        assert_eq!("Binpack".parse::<DistributionStrategy>(), Ok(DistributionStrategy::Binpack));
        assert!("FAILURED".parse::<StreamStatus>().is_err());
    }

    #[test]
    fn test_epoch_conversion_keeps_microseconds() {
        let seconds = 1_700_000_000.250_5;
        let time = from_epoch(seconds);
        assert!((to_epoch(time) - seconds).abs() < 1e-6);
    }
}

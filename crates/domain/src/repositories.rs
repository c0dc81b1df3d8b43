//! 领域仓储抽象
//!
//! 状态迁移类操作都是带条件的单语句更新，返回值表示是否真正生效。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use riberry_core::RiberryResult;

use crate::entities::{
    Application, ApplicationInstance, CapacityConfiguration, Event, ExternalTask, Form, Job,
    JobExecution, JobExecutionArtifact, JobExecutionStream, JobExecutionStreamStep, NewEvent,
    Notification, ResourceData, Schedule, User,
};
use crate::value_objects::{ExecutionStatus, ExternalTaskStatus};

/// 应用与应用实例仓储
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn create_application(&self, application: &Application) -> RiberryResult<Application>;
    async fn create_instance(&self, instance: &ApplicationInstance)
        -> RiberryResult<ApplicationInstance>;
    async fn find_by_id(&self, id: i64) -> RiberryResult<Option<ApplicationInstance>>;
    async fn find_by_internal_name(&self, name: &str)
        -> RiberryResult<Option<ApplicationInstance>>;
    /// 写入（或更新）实例心跳
    async fn echo(&self, instance_id: i64, now: DateTime<Utc>) -> RiberryResult<()>;
    /// 声明了指定调度参数的实例
    async fn find_with_parameter(&self, parameter: &str) -> RiberryResult<Vec<ApplicationInstance>>;
}

/// 调度仓储
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn create(&self, schedule: &Schedule) -> RiberryResult<Schedule>;
    async fn find_by_instance(&self, instance_id: i64) -> RiberryResult<Vec<Schedule>>;
    /// 删除实例上给定参数的所有调度，并写入新的调度
    async fn replace_parameters(
        &self,
        instance_id: i64,
        parameters: &[String],
        schedules: &[Schedule],
    ) -> RiberryResult<()>;
}

/// 表单、作业与用户仓储
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_user(&self, user: &User) -> RiberryResult<User>;
    async fn find_user(&self, id: i64) -> RiberryResult<Option<User>>;
    async fn create_form(&self, form: &Form) -> RiberryResult<Form>;
    async fn find_form(&self, id: i64) -> RiberryResult<Option<Form>>;
    async fn create_job(&self, job: &Job) -> RiberryResult<Job>;
    async fn find_job(&self, id: i64) -> RiberryResult<Option<Job>>;
}

/// 作业执行仓储
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn create(&self, execution: &JobExecution) -> RiberryResult<JobExecution>;
    async fn find_by_id(&self, id: i64) -> RiberryResult<Option<JobExecution>>;
    async fn find_by_task_id(&self, task_id: &str) -> RiberryResult<Option<JobExecution>>;
    /// 按 `(priority desc, created asc, id asc)` 排序
    async fn find_by_instance_and_status(
        &self,
        instance_id: i64,
        statuses: &[ExecutionStatus],
    ) -> RiberryResult<Vec<JobExecution>>;
    async fn count_by_instance_and_status(
        &self,
        instance_id: i64,
        statuses: &[ExecutionStatus],
    ) -> RiberryResult<i64>;
    /// `RECEIVED -> READY`，同时写入根任务ID
    async fn mark_ready(&self, id: i64, task_id: &str, now: DateTime<Utc>) -> RiberryResult<bool>;
    /// `RECEIVED|READY -> ACTIVE`
    async fn mark_active(&self, id: i64, now: DateTime<Utc>) -> RiberryResult<bool>;
    /// 非终态 -> 终态，缺失的 `started` 同时补齐
    async fn mark_complete(
        &self,
        id: i64,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> RiberryResult<bool>;
}

/// 执行流与步骤仓储
#[async_trait]
pub trait StreamRepository: Send + Sync {
    async fn find_stream(
        &self,
        job_execution_id: i64,
        name: &str,
    ) -> RiberryResult<Option<JobExecutionStream>>;
    async fn find_stream_by_task_id(&self, task_id: &str)
        -> RiberryResult<Option<JobExecutionStream>>;
    async fn list_streams(&self, job_execution_id: i64) -> RiberryResult<Vec<JobExecutionStream>>;
    async fn create_stream(&self, stream: &JobExecutionStream) -> RiberryResult<JobExecutionStream>;
    async fn update_stream(&self, stream: &JobExecutionStream) -> RiberryResult<()>;
    async fn find_step(
        &self,
        stream_id: i64,
        task_id: &str,
    ) -> RiberryResult<Option<JobExecutionStreamStep>>;
    async fn list_steps(&self, stream_id: i64) -> RiberryResult<Vec<JobExecutionStreamStep>>;
    async fn create_step(&self, step: &JobExecutionStreamStep)
        -> RiberryResult<JobExecutionStreamStep>;
    async fn update_step(&self, step: &JobExecutionStreamStep) -> RiberryResult<()>;
}

/// 执行产物仓储
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// 同一来源事件只会写入一次，重复写入返回 `None`
    async fn create(
        &self,
        artifact: &JobExecutionArtifact,
    ) -> RiberryResult<Option<JobExecutionArtifact>>;
    async fn list_by_execution(
        &self,
        job_execution_id: i64,
    ) -> RiberryResult<Vec<JobExecutionArtifact>>;
}

/// 外部任务仓储
#[async_trait]
pub trait ExternalTaskRepository: Send + Sync {
    async fn create(&self, task: &ExternalTask) -> RiberryResult<ExternalTask>;
    async fn find_by_external_id(&self, external_task_id: &str)
        -> RiberryResult<Option<ExternalTask>>;
    async fn update(&self, task: &ExternalTask) -> RiberryResult<()>;
    /// 带状态前置条件的更新
    async fn transition(
        &self,
        external_task_id: &str,
        from: ExternalTaskStatus,
        to: ExternalTaskStatus,
        input_data: Option<serde_json::Value>,
        output_data: Option<serde_json::Value>,
    ) -> RiberryResult<bool>;
    /// 实例是否存在 ACTIVE 执行下的 READY 外部任务
    async fn has_ready_for_instance(&self, instance_id: i64) -> RiberryResult<bool>;
}

#[async_trait]
pub trait CapacityRepository: Send + Sync {
    async fn create(&self, configuration: &CapacityConfiguration)
        -> RiberryResult<CapacityConfiguration>;
    async fn list(&self) -> RiberryResult<Vec<CapacityConfiguration>>;
}

/// 事件日志仓储
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn append(&self, event: &NewEvent) -> RiberryResult<Event>;
    /// 按 `(time asc, id asc)` 读取
    async fn fetch_batch(&self, limit: Option<u32>) -> RiberryResult<Vec<Event>>;
    async fn delete(&self, ids: &[i64]) -> RiberryResult<u64>;
}

/// 执行共享数据仓储
#[async_trait]
pub trait ResourceDataRepository: Send + Sync {
    async fn find(&self, resource_id: i64, name: &str) -> RiberryResult<Option<ResourceData>>;
    /// 不存在时创建空记录，返回当前记录
    async fn get_or_create(&self, resource_id: i64, name: &str) -> RiberryResult<ResourceData>;
    async fn list_names(&self, resource_id: i64) -> RiberryResult<Vec<String>>;
    /// 锁空闲、已过期或已由 `holder` 持有时获取
    async fn try_lock(
        &self,
        resource_id: i64,
        name: &str,
        holder: &str,
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RiberryResult<bool>;
    /// 释放锁，`dirty` 时标记为需要刷新
    async fn unlock(&self, resource_id: i64, name: &str, holder: &str, dirty: bool)
        -> RiberryResult<bool>;
    /// 仅当 `holder` 持有未过期的锁时写入
    async fn write_locked(
        &self,
        resource_id: i64,
        name: &str,
        holder: &str,
        value: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> RiberryResult<bool>;
    async fn list_marked_for_refresh(&self, resource_id: Option<i64>)
        -> RiberryResult<Vec<ResourceData>>;
    async fn clear_refresh_mark(&self, id: i64) -> RiberryResult<()>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, notification: &Notification) -> RiberryResult<Notification>;
    async fn list_for_user(&self, user_id: i64) -> RiberryResult<Vec<Notification>>;
}

/// 所有仓储的集合
#[derive(Clone)]
pub struct Repositories {
    pub instances: Arc<dyn InstanceRepository>,
    pub schedules: Arc<dyn ScheduleRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub streams: Arc<dyn StreamRepository>,
    pub artifacts: Arc<dyn ArtifactRepository>,
    pub external_tasks: Arc<dyn ExternalTaskRepository>,
    pub capacities: Arc<dyn CapacityRepository>,
    pub events: Arc<dyn EventRepository>,
    pub resource_data: Arc<dyn ResourceDataRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
}

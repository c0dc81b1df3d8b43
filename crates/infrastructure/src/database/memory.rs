//! 进程内数据库
//!
//! 与 PostgreSQL 实现保持相同的条件更新语义，用于 `memory://` 本地运行和测试。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use riberry_core::{RiberryError, RiberryResult};
use riberry_domain::{
    Application, ApplicationInstance, ArtifactRepository, CapacityConfiguration,
    CapacityRepository, Event, EventRepository, ExecutionRepository, ExecutionStatus,
    ExternalTask, ExternalTaskRepository, ExternalTaskStatus, Form, InstanceRepository, Job,
    JobExecution, JobExecutionArtifact, JobExecutionStream, JobExecutionStreamStep, JobRepository,
    NewEvent, Notification, NotificationRepository, Repositories, ResourceData,
    ResourceDataRepository, Schedule, ScheduleRepository, StreamRepository, User,
};
use tokio::sync::Mutex;

#[derive(Default)]
struct Tables {
    next_id: i64,
    applications: BTreeMap<i64, Application>,
    instances: BTreeMap<i64, ApplicationInstance>,
    heartbeats: HashMap<i64, DateTime<Utc>>,
    schedules: BTreeMap<i64, Schedule>,
    users: BTreeMap<i64, User>,
    forms: BTreeMap<i64, Form>,
    jobs: BTreeMap<i64, Job>,
    executions: BTreeMap<i64, JobExecution>,
    streams: BTreeMap<i64, JobExecutionStream>,
    steps: BTreeMap<i64, JobExecutionStreamStep>,
    artifacts: BTreeMap<i64, JobExecutionArtifact>,
    external_tasks: BTreeMap<i64, ExternalTask>,
    capacities: BTreeMap<i64, CapacityConfiguration>,
    events: BTreeMap<i64, Event>,
    resource_data: BTreeMap<i64, ResourceData>,
    notifications: BTreeMap<i64, Notification>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn instance_of_execution(&self, execution: &JobExecution) -> Option<i64> {
        let job = self.jobs.get(&execution.job_id)?;
        self.forms.get(&job.form_id).map(|form| form.instance_id)
    }

    fn with_heartbeat(&self, instance: &ApplicationInstance) -> ApplicationInstance {
        ApplicationInstance {
            heartbeat: self.heartbeats.get(&instance.id).copied(),
            ..instance.clone()
        }
    }

    fn resource_data_mut(&mut self, resource_id: i64, name: &str) -> Option<&mut ResourceData> {
        self.resource_data
            .values_mut()
            .find(|data| data.resource_id == resource_id && data.name == name)
    }
}

fn duplicate(what: &str, key: &str) -> RiberryError {
    RiberryError::Internal(format!("唯一约束冲突: {what} {key}"))
}

/// 实现全部仓储接口的内存数据库
#[derive(Default)]
pub struct InMemoryDatabase {
    tables: Mutex<Tables>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repositories(self: &Arc<Self>) -> Repositories {
        Repositories {
            instances: self.clone(),
            schedules: self.clone(),
            jobs: self.clone(),
            executions: self.clone(),
            streams: self.clone(),
            artifacts: self.clone(),
            external_tasks: self.clone(),
            capacities: self.clone(),
            events: self.clone(),
            resource_data: self.clone(),
            notifications: self.clone(),
        }
    }

    /// 事件表当前行数
    pub async fn event_count(&self) -> usize {
        self.tables.lock().await.events.len()
    }
}

#[async_trait]
impl InstanceRepository for InMemoryDatabase {
    async fn create_application(&self, application: &Application) -> RiberryResult<Application> {
        let mut tables = self.tables.lock().await;
        if tables
            .applications
            .values()
            .any(|a| a.internal_name == application.internal_name)
        {
            return Err(duplicate("application", &application.internal_name));
        }
        let created = Application {
            id: tables.allocate_id(),
            ..application.clone()
        };
        tables.applications.insert(created.id, created.clone());
        Ok(created)
    }

    async fn create_instance(
        &self,
        instance: &ApplicationInstance,
    ) -> RiberryResult<ApplicationInstance> {
        let mut tables = self.tables.lock().await;
        if tables
            .instances
            .values()
            .any(|i| i.internal_name == instance.internal_name)
        {
            return Err(duplicate("instance", &instance.internal_name));
        }
        let created = ApplicationInstance {
            id: tables.allocate_id(),
            heartbeat: None,
            ..instance.clone()
        };
        tables.instances.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> RiberryResult<Option<ApplicationInstance>> {
        let tables = self.tables.lock().await;
        Ok(tables.instances.get(&id).map(|i| tables.with_heartbeat(i)))
    }

    async fn find_by_internal_name(&self, name: &str) -> RiberryResult<Option<ApplicationInstance>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .instances
            .values()
            .find(|i| i.internal_name == name)
            .map(|i| tables.with_heartbeat(i)))
    }

    async fn echo(&self, instance_id: i64, now: DateTime<Utc>) -> RiberryResult<()> {
        self.tables.lock().await.heartbeats.insert(instance_id, now);
        Ok(())
    }

    async fn find_with_parameter(&self, parameter: &str) -> RiberryResult<Vec<ApplicationInstance>> {
        let tables = self.tables.lock().await;
        let mut instances: Vec<ApplicationInstance> = tables
            .instances
            .values()
            .filter(|i| {
                tables
                    .schedules
                    .values()
                    .any(|s| s.instance_id == i.id && s.parameter == parameter)
            })
            .map(|i| tables.with_heartbeat(i))
            .collect();
        instances.sort_by(|a, b| a.internal_name.cmp(&b.internal_name));
        Ok(instances)
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryDatabase {
    async fn create(&self, schedule: &Schedule) -> RiberryResult<Schedule> {
        let mut tables = self.tables.lock().await;
        let created = Schedule {
            id: tables.allocate_id(),
            ..schedule.clone()
        };
        tables.schedules.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_instance(&self, instance_id: i64) -> RiberryResult<Vec<Schedule>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .schedules
            .values()
            .filter(|s| s.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn replace_parameters(
        &self,
        instance_id: i64,
        parameters: &[String],
        schedules: &[Schedule],
    ) -> RiberryResult<()> {
        let mut tables = self.tables.lock().await;
        tables
            .schedules
            .retain(|_, s| !(s.instance_id == instance_id && parameters.contains(&s.parameter)));
        for schedule in schedules {
            let created = Schedule {
                id: tables.allocate_id(),
                ..schedule.clone()
            };
            tables.schedules.insert(created.id, created);
        }
        Ok(())
    }
}

#[async_trait]
impl JobRepository for InMemoryDatabase {
    async fn create_user(&self, user: &User) -> RiberryResult<User> {
        let mut tables = self.tables.lock().await;
        let created = User {
            id: tables.allocate_id(),
            ..user.clone()
        };
        tables.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_user(&self, id: i64) -> RiberryResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn create_form(&self, form: &Form) -> RiberryResult<Form> {
        let mut tables = self.tables.lock().await;
        let created = Form {
            id: tables.allocate_id(),
            ..form.clone()
        };
        tables.forms.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_form(&self, id: i64) -> RiberryResult<Option<Form>> {
        Ok(self.tables.lock().await.forms.get(&id).cloned())
    }

    async fn create_job(&self, job: &Job) -> RiberryResult<Job> {
        let mut tables = self.tables.lock().await;
        let created = Job {
            id: tables.allocate_id(),
            ..job.clone()
        };
        tables.jobs.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_job(&self, id: i64) -> RiberryResult<Option<Job>> {
        Ok(self.tables.lock().await.jobs.get(&id).cloned())
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryDatabase {
    async fn create(&self, execution: &JobExecution) -> RiberryResult<JobExecution> {
        let mut tables = self.tables.lock().await;
        if let Some(task_id) = &execution.task_id {
            if tables
                .executions
                .values()
                .any(|e| e.task_id.as_ref() == Some(task_id))
            {
                return Err(duplicate("job_execution.task_id", task_id));
            }
        }
        let created = JobExecution {
            id: tables.allocate_id(),
            ..execution.clone()
        };
        tables.executions.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> RiberryResult<Option<JobExecution>> {
        Ok(self.tables.lock().await.executions.get(&id).cloned())
    }

    async fn find_by_task_id(&self, task_id: &str) -> RiberryResult<Option<JobExecution>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .executions
            .values()
            .find(|e| e.task_id.as_deref() == Some(task_id))
            .cloned())
    }

    async fn find_by_instance_and_status(
        &self,
        instance_id: i64,
        statuses: &[ExecutionStatus],
    ) -> RiberryResult<Vec<JobExecution>> {
        let tables = self.tables.lock().await;
        let mut executions: Vec<JobExecution> = tables
            .executions
            .values()
            .filter(|e| statuses.contains(&e.status))
            .filter(|e| tables.instance_of_execution(e) == Some(instance_id))
            .cloned()
            .collect();
        executions.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created.cmp(&b.created))
                .then(a.id.cmp(&b.id))
        });
        Ok(executions)
    }

    async fn count_by_instance_and_status(
        &self,
        instance_id: i64,
        statuses: &[ExecutionStatus],
    ) -> RiberryResult<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .executions
            .values()
            .filter(|e| statuses.contains(&e.status))
            .filter(|e| tables.instance_of_execution(e) == Some(instance_id))
            .count() as i64)
    }

    async fn mark_ready(&self, id: i64, task_id: &str, now: DateTime<Utc>) -> RiberryResult<bool> {
        let mut tables = self.tables.lock().await;
        if tables
            .executions
            .values()
            .any(|e| e.id != id && e.task_id.as_deref() == Some(task_id))
        {
            return Err(duplicate("job_execution.task_id", task_id));
        }
        match tables.executions.get_mut(&id) {
            Some(execution) if execution.status == ExecutionStatus::Received => {
                execution.status = ExecutionStatus::Ready;
                execution.task_id = Some(task_id.to_string());
                execution.updated = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_active(&self, id: i64, now: DateTime<Utc>) -> RiberryResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.executions.get_mut(&id) {
            Some(execution)
                if matches!(
                    execution.status,
                    ExecutionStatus::Received | ExecutionStatus::Ready
                ) =>
            {
                execution.status = ExecutionStatus::Active;
                execution.started.get_or_insert(now);
                execution.updated = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_complete(
        &self,
        id: i64,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> RiberryResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.executions.get_mut(&id) {
            Some(execution) if !execution.status.is_terminal() => {
                execution.status = status;
                execution.completed = Some(now);
                execution.started.get_or_insert(now);
                execution.updated = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl StreamRepository for InMemoryDatabase {
    async fn find_stream(
        &self,
        job_execution_id: i64,
        name: &str,
    ) -> RiberryResult<Option<JobExecutionStream>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .streams
            .values()
            .find(|s| s.job_execution_id == job_execution_id && s.name == name)
            .cloned())
    }

    async fn find_stream_by_task_id(&self, task_id: &str) -> RiberryResult<Option<JobExecutionStream>> {
        let tables = self.tables.lock().await;
        Ok(tables.streams.values().find(|s| s.task_id == task_id).cloned())
    }

    async fn list_streams(&self, job_execution_id: i64) -> RiberryResult<Vec<JobExecutionStream>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .streams
            .values()
            .filter(|s| s.job_execution_id == job_execution_id)
            .cloned()
            .collect())
    }

    async fn create_stream(&self, stream: &JobExecutionStream) -> RiberryResult<JobExecutionStream> {
        let mut tables = self.tables.lock().await;
        if tables.streams.values().any(|s| {
            s.task_id == stream.task_id
                || (s.job_execution_id == stream.job_execution_id && s.name == stream.name)
        }) {
            return Err(duplicate("job_execution_stream", &stream.task_id));
        }
        let created = JobExecutionStream {
            id: tables.allocate_id(),
            ..stream.clone()
        };
        tables.streams.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_stream(&self, stream: &JobExecutionStream) -> RiberryResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.streams.get_mut(&stream.id) {
            existing.status = stream.status;
            existing.created = stream.created;
            existing.started = stream.started;
            existing.completed = stream.completed;
            existing.updated = stream.updated;
        }
        Ok(())
    }

    async fn find_step(
        &self,
        stream_id: i64,
        task_id: &str,
    ) -> RiberryResult<Option<JobExecutionStreamStep>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .steps
            .values()
            .find(|s| s.stream_id == stream_id && s.task_id == task_id)
            .cloned())
    }

    async fn list_steps(&self, stream_id: i64) -> RiberryResult<Vec<JobExecutionStreamStep>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .steps
            .values()
            .filter(|s| s.stream_id == stream_id)
            .cloned()
            .collect())
    }

    async fn create_step(&self, step: &JobExecutionStreamStep) -> RiberryResult<JobExecutionStreamStep> {
        let mut tables = self.tables.lock().await;
        if tables
            .steps
            .values()
            .any(|s| s.stream_id == step.stream_id && s.task_id == step.task_id)
        {
            return Err(duplicate("job_execution_stream_step", &step.task_id));
        }
        let created = JobExecutionStreamStep {
            id: tables.allocate_id(),
            ..step.clone()
        };
        tables.steps.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_step(&self, step: &JobExecutionStreamStep) -> RiberryResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.steps.get_mut(&step.id) {
            existing.name = step.name.clone();
            existing.status = step.status;
            existing.created = step.created;
            existing.started = step.started;
            existing.completed = step.completed;
            existing.updated = step.updated;
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactRepository for InMemoryDatabase {
    async fn create(
        &self,
        artifact: &JobExecutionArtifact,
    ) -> RiberryResult<Option<JobExecutionArtifact>> {
        let mut tables = self.tables.lock().await;
        if let Some(source) = artifact.source_event_id {
            if tables
                .artifacts
                .values()
                .any(|a| a.source_event_id == Some(source))
            {
                return Ok(None);
            }
        }
        let created = JobExecutionArtifact {
            id: tables.allocate_id(),
            ..artifact.clone()
        };
        tables.artifacts.insert(created.id, created.clone());
        Ok(Some(created))
    }

    async fn list_by_execution(
        &self,
        job_execution_id: i64,
    ) -> RiberryResult<Vec<JobExecutionArtifact>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .artifacts
            .values()
            .filter(|a| a.job_execution_id == job_execution_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ExternalTaskRepository for InMemoryDatabase {
    async fn create(&self, task: &ExternalTask) -> RiberryResult<ExternalTask> {
        let mut tables = self.tables.lock().await;
        if tables
            .external_tasks
            .values()
            .any(|t| t.external_task_id == task.external_task_id)
        {
            return Err(duplicate("external_task", &task.external_task_id));
        }
        let created = ExternalTask {
            id: tables.allocate_id(),
            ..task.clone()
        };
        tables.external_tasks.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_external_id(&self, external_task_id: &str) -> RiberryResult<Option<ExternalTask>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .external_tasks
            .values()
            .find(|t| t.external_task_id == external_task_id)
            .cloned())
    }

    async fn update(&self, task: &ExternalTask) -> RiberryResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables
            .external_tasks
            .values_mut()
            .find(|t| t.external_task_id == task.external_task_id)
        {
            existing.status = task.status;
            existing.input_data = task.input_data.clone();
            existing.output_data = task.output_data.clone();
        }
        Ok(())
    }

    async fn transition(
        &self,
        external_task_id: &str,
        from: ExternalTaskStatus,
        to: ExternalTaskStatus,
        input_data: Option<serde_json::Value>,
        output_data: Option<serde_json::Value>,
    ) -> RiberryResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables
            .external_tasks
            .values_mut()
            .find(|t| t.external_task_id == external_task_id)
        {
            Some(task) if task.status == from => {
                task.status = to;
                if input_data.is_some() {
                    task.input_data = input_data;
                }
                if output_data.is_some() {
                    task.output_data = output_data;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn has_ready_for_instance(&self, instance_id: i64) -> RiberryResult<bool> {
        let tables = self.tables.lock().await;
        Ok(tables.external_tasks.values().any(|task| {
            task.status == ExternalTaskStatus::Ready
                && tables
                    .executions
                    .get(&task.job_execution_id)
                    .filter(|e| e.status == ExecutionStatus::Active)
                    .and_then(|e| tables.instance_of_execution(e))
                    == Some(instance_id)
        }))
    }
}

#[async_trait]
impl CapacityRepository for InMemoryDatabase {
    async fn create(
        &self,
        configuration: &CapacityConfiguration,
    ) -> RiberryResult<CapacityConfiguration> {
        let mut tables = self.tables.lock().await;
        if tables
            .capacities
            .values()
            .any(|c| c.weight_parameter == configuration.weight_parameter)
        {
            return Err(duplicate("capacity_configuration", &configuration.weight_parameter));
        }
        let id = tables.allocate_id();
        let mut producers = Vec::with_capacity(configuration.producers.len());
        for producer in &configuration.producers {
            let mut producer = producer.clone();
            producer.id = tables.allocate_id();
            producer.configuration_id = id;
            producers.push(producer);
        }
        let created = CapacityConfiguration {
            id,
            producers,
            ..configuration.clone()
        };
        tables.capacities.insert(id, created.clone());
        Ok(created)
    }

    async fn list(&self) -> RiberryResult<Vec<CapacityConfiguration>> {
        Ok(self.tables.lock().await.capacities.values().cloned().collect())
    }
}

#[async_trait]
impl EventRepository for InMemoryDatabase {
    async fn append(&self, event: &NewEvent) -> RiberryResult<Event> {
        let mut tables = self.tables.lock().await;
        let created = Event {
            id: tables.allocate_id(),
            name: event.name.clone(),
            time: event.time,
            root_id: event.root_id.clone(),
            task_id: event.task_id.clone(),
            data: event.data.clone(),
            binary: event.binary.clone(),
        };
        tables.events.insert(created.id, created.clone());
        Ok(created)
    }

    async fn fetch_batch(&self, limit: Option<u32>) -> RiberryResult<Vec<Event>> {
        let tables = self.tables.lock().await;
        let mut events: Vec<Event> = tables.events.values().cloned().collect();
        events.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.id.cmp(&b.id)));
        if let Some(limit) = limit {
            events.truncate(limit as usize);
        }
        Ok(events)
    }

    async fn delete(&self, ids: &[i64]) -> RiberryResult<u64> {
        let mut tables = self.tables.lock().await;
        Ok(ids
            .iter()
            .filter(|id| tables.events.remove(*id).is_some())
            .count() as u64)
    }
}

#[async_trait]
impl ResourceDataRepository for InMemoryDatabase {
    async fn find(&self, resource_id: i64, name: &str) -> RiberryResult<Option<ResourceData>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .resource_data
            .values()
            .find(|d| d.resource_id == resource_id && d.name == name)
            .cloned())
    }

    async fn get_or_create(&self, resource_id: i64, name: &str) -> RiberryResult<ResourceData> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.resource_data_mut(resource_id, name) {
            return Ok(existing.clone());
        }
        let created = ResourceData {
            id: tables.allocate_id(),
            resource_id,
            name: name.to_string(),
            value: None,
            lock: None,
            expiry: None,
            marked_for_refresh: false,
        };
        tables.resource_data.insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_names(&self, resource_id: i64) -> RiberryResult<Vec<String>> {
        let tables = self.tables.lock().await;
        let mut names: Vec<String> = tables
            .resource_data
            .values()
            .filter(|d| d.resource_id == resource_id)
            .map(|d| d.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn try_lock(
        &self,
        resource_id: i64,
        name: &str,
        holder: &str,
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RiberryResult<bool> {
        let mut tables = self.tables.lock().await;
        if tables.resource_data_mut(resource_id, name).is_none() {
            let id = tables.allocate_id();
            tables.resource_data.insert(
                id,
                ResourceData {
                    id,
                    resource_id,
                    name: name.to_string(),
                    value: None,
                    lock: None,
                    expiry: None,
                    marked_for_refresh: false,
                },
            );
        }
        let Some(data) = tables.resource_data_mut(resource_id, name) else {
            return Ok(false);
        };
        if data.is_lock_free(now) || data.lock.as_deref() == Some(holder) {
            data.lock = Some(holder.to_string());
            data.expiry = Some(expiry);
            return Ok(true);
        }
        Ok(false)
    }

    async fn unlock(
        &self,
        resource_id: i64,
        name: &str,
        holder: &str,
        dirty: bool,
    ) -> RiberryResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.resource_data_mut(resource_id, name) {
            Some(data) if data.lock.as_deref() == Some(holder) => {
                data.lock = None;
                data.expiry = None;
                data.marked_for_refresh |= dirty;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn write_locked(
        &self,
        resource_id: i64,
        name: &str,
        holder: &str,
        value: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> RiberryResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.resource_data_mut(resource_id, name) {
            Some(data) if data.is_locked_by(holder, now) => {
                data.value = Some(value.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_marked_for_refresh(
        &self,
        resource_id: Option<i64>,
    ) -> RiberryResult<Vec<ResourceData>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .resource_data
            .values()
            .filter(|d| d.marked_for_refresh)
            .filter(|d| resource_id.map_or(true, |id| d.resource_id == id))
            .cloned()
            .collect())
    }

    async fn clear_refresh_mark(&self, id: i64) -> RiberryResult<()> {
        if let Some(data) = self.tables.lock().await.resource_data.get_mut(&id) {
            data.marked_for_refresh = false;
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationRepository for InMemoryDatabase {
    async fn create(&self, notification: &Notification) -> RiberryResult<Notification> {
        let mut tables = self.tables.lock().await;
        let created = Notification {
            id: tables.allocate_id(),
            ..notification.clone()
        };
        tables.notifications.insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_for_user(&self, user_id: i64) -> RiberryResult<Vec<Notification>> {
        let tables = self.tables.lock().await;
        let mut notifications: Vec<Notification> = tables
            .notifications
            .values()
            .filter(|n| n.user_id == Some(user_id))
            .cloned()
            .collect();
        notifications.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
        Ok(notifications)
    }
}

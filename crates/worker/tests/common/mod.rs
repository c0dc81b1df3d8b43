#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use riberry_core::{config::TransportConfig, TaskMessage, TaskRouter};
use riberry_domain::*;
use riberry_infrastructure::Infrastructure;
use riberry_worker::{
    EventRegistry, ExecutorSettings, TaskExecutor, TaskOutcome, TaskRegistry, WorkerServices,
};
use serde_json::json;

pub const INSTANCE: &str = "reports-prod";
pub const ENTRY_POINT: &str = "monthly_report";
pub const PRIMARY_STREAM: &str = "Overall";
pub const DEFAULT_QUEUE: &str = "rib.default";

pub struct Fixture {
    pub infra: Infrastructure,
    pub repos: Repositories,
    pub instance: ApplicationInstance,
    pub form: Form,
    pub user: User,
}

impl Fixture {
    pub async fn new() -> Self {
        let infra = Infrastructure::in_memory();
        let repos = infra.repositories.clone();
        let app = repos
            .instances
            .create_application(&Application {
                id: 0,
                name: "Reports".into(),
                internal_name: "reports".into(),
                enabled: true,
            })
            .await
            .unwrap();
        let instance = repos
            .instances
            .create_instance(&ApplicationInstance {
                id: 0,
                application_id: app.id,
                name: INSTANCE.into(),
                internal_name: INSTANCE.into(),
                heartbeat: None,
            })
            .await
            .unwrap();
        let form = repos
            .jobs
            .create_form(&Form {
                id: 0,
                application_id: app.id,
                instance_id: instance.id,
                name: "Monthly".into(),
                internal_name: "monthly".into(),
                entry_point: ENTRY_POINT.into(),
            })
            .await
            .unwrap();
        let user = repos
            .jobs
            .create_user(&User {
                id: 0,
                username: "owner".into(),
                email: Some("owner@reports.example".into()),
            })
            .await
            .unwrap();

        Self {
            infra,
            repos,
            instance,
            form,
            user,
        }
    }

    pub async fn online(&self) {
        self.repos
            .instances
            .echo(self.instance.id, Utc::now())
            .await
            .unwrap();
    }

    pub async fn schedule(&self, parameter: &str, value: &str) {
        self.repos
            .schedules
            .create(&Schedule::all_day(self.instance.id, parameter, value, 1))
            .await
            .unwrap();
    }

    pub async fn execution(&self) -> JobExecution {
        let job = self
            .repos
            .jobs
            .create_job(&Job {
                id: 0,
                form_id: self.form.id,
                name: "June".into(),
                creator_id: Some(self.user.id),
                inputs: json!([]),
                created: Utc::now(),
            })
            .await
            .unwrap();
        self.repos
            .executions
            .create(&JobExecution::new(job.id, Some(self.user.id), 64))
            .await
            .unwrap()
    }

    /// 已提交到传输层的执行，返回执行和根任务ID
    pub async fn ready_execution(&self) -> (JobExecution, String) {
        let execution = self.execution().await;
        let root_id = uuid::Uuid::new_v4().to_string();
        assert!(self
            .repos
            .executions
            .mark_ready(execution.id, &root_id, Utc::now())
            .await
            .unwrap());
        (self.reload(&execution).await, root_id)
    }

    /// 已开始运行的执行
    pub async fn active_execution(&self) -> (JobExecution, String) {
        let (execution, root_id) = self.ready_execution().await;
        self.lifecycle()
            .execution_started(execution.id, &root_id, PRIMARY_STREAM)
            .await
            .unwrap();
        (self.reload(&execution).await, root_id)
    }

    pub async fn reload(&self, execution: &JobExecution) -> JobExecution {
        self.repos
            .executions
            .find_by_id(execution.id)
            .await
            .unwrap()
            .unwrap()
    }

    pub fn lifecycle(&self) -> ExecutionLifecycle {
        ExecutionLifecycle::new(self.repos.clone())
    }

    pub fn services(&self, events: Option<Arc<EventRegistry>>) -> Arc<WorkerServices> {
        let lifecycle = match events {
            Some(events) => self.lifecycle().with_completion_hook(events),
            None => self.lifecycle(),
        };
        Arc::new(WorkerServices::new(
            INSTANCE,
            lifecycle,
            self.infra.transport.clone(),
            TaskRouter::from_config(&TransportConfig::default()),
        ))
    }

    pub fn executor(&self, tasks: TaskRegistry) -> TaskExecutor {
        self.executor_with(tasks, None, ExecutorSettings::default())
    }

    pub fn executor_with(
        &self,
        tasks: TaskRegistry,
        events: Option<Arc<EventRegistry>>,
        settings: ExecutorSettings,
    ) -> TaskExecutor {
        TaskExecutor::new(tasks, self.services(events), settings)
    }

    /// 立即消费默认队列中的下一条消息
    pub async fn next_message(&self) -> Option<TaskMessage> {
        self.infra
            .transport
            .consume_message(DEFAULT_QUEUE)
            .await
            .unwrap()
    }

    /// 依次执行默认队列中的消息直到队列为空
    pub async fn drain(&self, executor: &TaskExecutor) -> Vec<(String, TaskOutcome)> {
        let mut outcomes = Vec::new();
        while let Some(message) = self.next_message().await {
            let name = message.task_name.clone();
            outcomes.push((name, executor.execute(message).await));
        }
        outcomes
    }

    /// 尚未被后台落库的事件
    pub async fn pending_events(&self) -> Vec<Event> {
        self.repos.events.fetch_batch(None).await.unwrap()
    }

    pub async fn stream_states(&self, root_id: &str, stream: &str) -> Vec<StreamStatus> {
        self.pending_events()
            .await
            .into_iter()
            .filter(|e| e.root_id == root_id && e.name == event_names::STREAM)
            .filter_map(|e| serde_json::from_value::<StreamEventData>(e.data).ok())
            .filter(|data| data.stream == stream)
            .map(|data| data.state)
            .collect()
    }
}

pub fn fast_settings() -> ExecutorSettings {
    ExecutorSettings {
        default_retry_delay: Duration::from_millis(0),
        ..ExecutorSettings::default()
    }
}

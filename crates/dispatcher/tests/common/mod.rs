#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use riberry_core::{config::TransportConfig, RiberryResult, TaskRouter};
use riberry_dispatcher::{ExecutionDispatcher, ExecutionTracker, TransportLauncher};
use riberry_domain::*;
use riberry_infrastructure::Infrastructure;
use serde_json::json;
use tokio::sync::Mutex;

pub const INSTANCE: &str = "reports-prod";
pub const ENTRY_POINT: &str = "monthly_report";
pub const PRIMARY_STREAM: &str = "Overall";

pub struct Fixture {
    pub infra: Infrastructure,
    pub repos: Repositories,
    pub instance: ApplicationInstance,
    pub form: Form,
    pub user: User,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_instance(Infrastructure::in_memory(), INSTANCE).await
    }

    pub async fn with_instance(infra: Infrastructure, instance_name: &str) -> Self {
        let repos = infra.repositories.clone();
        let app = repos
            .instances
            .create_application(&Application {
                id: 0,
                name: format!("App {instance_name}"),
                internal_name: format!("app-{instance_name}"),
                enabled: true,
            })
            .await
            .unwrap();
        let instance = repos
            .instances
            .create_instance(&ApplicationInstance {
                id: 0,
                application_id: app.id,
                name: instance_name.to_string(),
                internal_name: instance_name.to_string(),
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
                internal_name: format!("monthly-{instance_name}"),
                entry_point: ENTRY_POINT.into(),
            })
            .await
            .unwrap();
        let user = repos
            .jobs
            .create_user(&User {
                id: 0,
                username: format!("owner-{instance_name}"),
                email: Some(format!("owner@{instance_name}.example")),
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

    pub async fn execution(&self, priority: i32) -> JobExecution {
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
            .create(&JobExecution::new(job.id, Some(self.user.id), priority))
            .await
            .unwrap()
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

    pub fn tracker(&self) -> ExecutionTracker {
        ExecutionTracker::new(self.infra.store.clone())
    }

    pub fn dispatcher(&self) -> ExecutionDispatcher {
        let launcher = TransportLauncher::new(
            self.infra.transport.clone(),
            TaskRouter::from_config(&TransportConfig::default()),
            self.lifecycle(),
        )
        .with_entry_point(ENTRY_POINT, PRIMARY_STREAM);
        ExecutionDispatcher::new(self.lifecycle(), self.tracker(), Arc::new(launcher), 10)
    }
}

/// 记录所有发送请求的邮件发送器
#[derive(Default)]
pub struct RecordingEmailSender {
    pub sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, message: &EmailMessage) -> RiberryResult<()> {
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}

//! 作业执行调度
//!
//! 把实例上 RECEIVED 的执行按 `(priority desc, created asc, id asc)` 依次置为 READY 并提交。

use std::sync::Arc;

use chrono::Utc;
use riberry_core::{RiberryError, RiberryResult};
use riberry_domain::{
    ArtifactType, ExecutionLifecycle, ExecutionStatus, InstanceStatus, JobExecution, NewArtifact,
};
use riberry_infrastructure::observability::EXECUTIONS_DISPATCHED;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::instance::InstanceSnapshot;
use crate::launcher::ExecutionLauncher;
use crate::tracker::ExecutionTracker;

/// 是否接收新执行的调度参数
pub const ACCEPT_PARAMETER: &str = "accept";
/// READY/ACTIVE 执行数上限的调度参数
pub const LIMIT_PARAMETER: &str = "limit";

pub struct ExecutionDispatcher {
    lifecycle: ExecutionLifecycle,
    tracker: ExecutionTracker,
    launcher: Arc<dyn ExecutionLauncher>,
    offline_after_seconds: i64,
}

impl ExecutionDispatcher {
    pub fn new(
        lifecycle: ExecutionLifecycle,
        tracker: ExecutionTracker,
        launcher: Arc<dyn ExecutionLauncher>,
        offline_after_seconds: i64,
    ) -> Self {
        Self {
            lifecycle,
            tracker,
            launcher,
            offline_after_seconds,
        }
    }

    /// 返回本轮提交的执行数
    #[instrument(skip_all, fields(instance = %snapshot.name()))]
    pub async fn poll(&self, snapshot: &InstanceSnapshot) -> RiberryResult<usize> {
        let status = snapshot.status(self.offline_after_seconds);
        if status != InstanceStatus::Online {
            debug!("实例状态为 {}，跳过调度", status.as_str());
            return Ok(0);
        }

        if snapshot.value_or(ACCEPT_PARAMETER, "Y") == "N" {
            debug!("实例暂不接收新的作业执行，跳过调度");
            return Ok(0);
        }

        let repos = self.lifecycle.repositories();
        let executions = repos
            .executions
            .find_by_instance_and_status(snapshot.instance.id, &[ExecutionStatus::Received])
            .await?;

        let mut dispatched = 0;
        for execution in executions {
            if self.limit_reached(snapshot).await? {
                debug!("实例的 READY/ACTIVE 执行数已达上限");
                break;
            }

            match self.queue_execution(snapshot, &execution).await {
                Ok(Some(root_id)) => {
                    dispatched += 1;
                    info!(execution_id = execution.id, root_id = %root_id, "作业执行已提交");
                }
                Ok(None) => {}
                Err(e) => error!(execution_id = execution.id, "提交作业执行失败: {}", e),
            }
        }

        Ok(dispatched)
    }

    async fn limit_reached(&self, snapshot: &InstanceSnapshot) -> RiberryResult<bool> {
        let limit = match snapshot
            .value(LIMIT_PARAMETER)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
        {
            Some(limit) if limit > 0 => limit,
            _ => return Ok(false),
        };

        let current = self
            .lifecycle
            .repositories()
            .executions
            .count_by_instance_and_status(
                snapshot.instance.id,
                &[ExecutionStatus::Ready, ExecutionStatus::Active],
            )
            .await?;
        Ok(current >= limit)
    }

    /// 登记归属、置为 READY、提交；提交失败时执行直接失败并附带启动错误产物
    pub async fn queue_execution(
        &self,
        snapshot: &InstanceSnapshot,
        execution: &JobExecution,
    ) -> RiberryResult<Option<String>> {
        let repos = self.lifecycle.repositories();
        let job = repos
            .jobs
            .find_job(execution.job_id)
            .await?
            .ok_or_else(|| RiberryError::Internal(format!("作业不存在: {}", execution.job_id)))?;
        let form = repos
            .jobs
            .find_form(job.form_id)
            .await?
            .ok_or_else(|| RiberryError::Internal(format!("表单不存在: {}", job.form_id)))?;

        let root_id = Uuid::new_v4().to_string();
        self.tracker.track(snapshot.name(), &root_id).await?;

        if !repos
            .executions
            .mark_ready(execution.id, &root_id, Utc::now())
            .await?
        {
            debug!(execution_id = execution.id, "作业执行已不处于 RECEIVED，跳过");
            self.tracker.untrack(snapshot.name(), &root_id).await?;
            return Ok(None);
        }

        if let Err(e) = self.launcher.launch(execution, &root_id, &form).await {
            error!(execution_id = execution.id, root_id = %root_id, "启动作业执行失败: {}", e);
            self.fail_on_startup(snapshot, execution, &root_id, &e).await?;
            return Err(e);
        }

        metrics::counter!(EXECUTIONS_DISPATCHED).increment(1);
        Ok(Some(root_id))
    }

    async fn fail_on_startup(
        &self,
        snapshot: &InstanceSnapshot,
        execution: &JobExecution,
        root_id: &str,
        cause: &RiberryError,
    ) -> RiberryResult<()> {
        self.tracker.untrack(snapshot.name(), root_id).await?;

        let repos = self.lifecycle.repositories();
        repos
            .executions
            .mark_complete(execution.id, ExecutionStatus::Failure, Utc::now())
            .await?;

        let artifact = NewArtifact::new("startup-error.log", format!("{cause:?}\n{cause}").into_bytes())
            .named("Error on Startup")
            .of_type(ArtifactType::Error)
            .in_category("Fatal");
        self.lifecycle.attach_artifact(execution.id, artifact).await?;
        Ok(())
    }
}

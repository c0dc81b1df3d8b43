//! 执行归属跟踪与失联执行看门狗
//!
//! 归属集合保存在共享存储 `workflow:active:<instance>` 中。调度器在把执行置为
//! READY 之前写入集合，因此看门狗看到的 READY/ACTIVE 执行要么已登记，要么确已失联。

use std::sync::Arc;

use riberry_core::{RiberryResult, SharedStore};
use riberry_domain::{
    ApplicationInstance, ArtifactType, ExecutionLifecycle, ExecutionStatus, JobExecution,
    NewArtifact,
};
use riberry_infrastructure::observability::EXECUTIONS_STALE;
use tracing::{debug, error, instrument, warn};

#[derive(Clone)]
pub struct ExecutionTracker {
    store: Arc<dyn SharedStore>,
}

impl ExecutionTracker {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    pub fn key(instance_name: &str) -> String {
        format!("workflow:active:{instance_name}")
    }

    pub async fn track(&self, instance_name: &str, root_id: &str) -> RiberryResult<()> {
        let key = Self::key(instance_name);
        debug!(root_id = %root_id, key = %key, "登记执行归属");
        self.store.sadd(&key, root_id).await
    }

    pub async fn untrack(&self, instance_name: &str, root_id: &str) -> RiberryResult<()> {
        self.store.srem(&Self::key(instance_name), root_id).await
    }

    pub async fn is_tracked(&self, instance_name: &str, root_id: &str) -> RiberryResult<bool> {
        self.store.sismember(&Self::key(instance_name), root_id).await
    }
}

/// 失联执行看门狗
#[derive(Clone)]
pub struct StaleExecutionWatchdog {
    tracker: ExecutionTracker,
    lifecycle: ExecutionLifecycle,
}

impl StaleExecutionWatchdog {
    pub fn new(tracker: ExecutionTracker, lifecycle: ExecutionLifecycle) -> Self {
        Self { tracker, lifecycle }
    }

    /// 返回被取消的执行数
    #[instrument(skip_all, fields(instance = %instance.internal_name))]
    pub async fn check(&self, instance: &ApplicationInstance) -> RiberryResult<usize> {
        let executions = self
            .lifecycle
            .repositories()
            .executions
            .find_by_instance_and_status(
                instance.id,
                &[ExecutionStatus::Active, ExecutionStatus::Ready],
            )
            .await?;

        let mut cancelled = 0;
        for execution in executions {
            let Some(root_id) = execution.task_id.clone() else {
                continue;
            };
            if self
                .tracker
                .is_tracked(&instance.internal_name, &root_id)
                .await?
            {
                continue;
            }

            match self.cancel(&execution, &root_id).await {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                Err(e) => error!(execution_id = execution.id, "取消失联执行失败: {}", e),
            }
        }

        Ok(cancelled)
    }

    async fn cancel(&self, execution: &JobExecution, root_id: &str) -> RiberryResult<bool> {
        warn!(
            execution_id = execution.id,
            root_id = %root_id,
            "取消失联的作业执行"
        );

        let artifact = NewArtifact::new("fatal.log", cancellation_message(root_id).into_bytes())
            .named("Workflow Cancelled")
            .of_type(ArtifactType::Error)
            .in_category("Fatal");
        self.lifecycle.attach_artifact(execution.id, artifact).await?;

        let completed = self
            .lifecycle
            .execution_complete(root_id, ExecutionStatus::Failure, None)
            .await?;
        if completed {
            metrics::counter!(EXECUTIONS_STALE).increment(1);
        }
        Ok(completed)
    }
}

fn cancellation_message(root_id: &str) -> String {
    format!(
        "The current execution's ID ({root_id}) was not found within the shared store and has \
         therefore been cancelled. This usually occurs when the store is flushed while an \
         execution is in the READY or ACTIVE state."
    )
}

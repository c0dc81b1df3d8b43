//! `step:background` 槽位下的工作：心跳、失联执行检查、调度与附加刷新

use std::sync::Arc;

use async_trait::async_trait;
use riberry_core::RiberryResult;
use riberry_domain::ExecutionLifecycle;
use tracing::{debug, error};

use crate::dispatcher::ExecutionDispatcher;
use crate::heartbeat::Heartbeat;
use crate::instance::InstanceSnapshot;
use crate::loop_runner::PeriodicStep;
use crate::tracker::StaleExecutionWatchdog;

/// 后台工作的锁槽位
pub const BACKGROUND_LOCK: &str = "step:background";

/// 调度之后在同一槽位内运行的附加工作
#[async_trait]
pub trait BackgroundHook: Send + Sync {
    async fn run(&self, snapshot: &InstanceSnapshot) -> RiberryResult<()>;
}

pub struct BackgroundTasks {
    instance_name: String,
    lifecycle: ExecutionLifecycle,
    heartbeat: Heartbeat,
    watchdog: Option<StaleExecutionWatchdog>,
    dispatcher: ExecutionDispatcher,
    hooks: Vec<Arc<dyn BackgroundHook>>,
}

impl BackgroundTasks {
    pub fn new(
        instance_name: impl Into<String>,
        lifecycle: ExecutionLifecycle,
        dispatcher: ExecutionDispatcher,
    ) -> Self {
        let instance_name = instance_name.into();
        Self {
            heartbeat: Heartbeat::new(lifecycle.repositories().clone(), instance_name.clone()),
            instance_name,
            lifecycle,
            watchdog: None,
            dispatcher,
            hooks: Vec::new(),
        }
    }

    pub fn with_watchdog(mut self, watchdog: StaleExecutionWatchdog) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn BackgroundHook>) -> Self {
        self.hooks.push(hook);
        self
    }
}

#[async_trait]
impl PeriodicStep for BackgroundTasks {
    fn name(&self) -> &str {
        BACKGROUND_LOCK
    }

    async fn run_once(&self) -> RiberryResult<()> {
        self.heartbeat.echo().await?;

        let snapshot =
            InstanceSnapshot::load(self.lifecycle.repositories(), &self.instance_name).await?;

        if let Some(watchdog) = &self.watchdog {
            match watchdog.check(&snapshot.instance).await {
                Ok(0) => {}
                Ok(cancelled) => debug!(cancelled, "已取消失联的作业执行"),
                Err(e) => error!("检查失联作业执行失败: {}", e),
            }
        }

        if let Err(e) = self.dispatcher.poll(&snapshot).await {
            error!("调度作业执行失败: {}", e);
        }

        for hook in &self.hooks {
            if let Err(e) = hook.run(&snapshot).await {
                error!("后台附加工作失败: {}", e);
            }
        }

        Ok(())
    }
}

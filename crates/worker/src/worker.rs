//! 工作进程装配
//!
//! 把应用、执行器、消费池和各个控制循环组装在一起，并统一启动和停止。

use std::sync::Arc;
use std::time::Duration;

use riberry_core::{AppConfig, RiberryError, RiberryResult, TaskRouter};
use riberry_dispatcher::{
    BackgroundTasks, CapacityDistributor, EventIngestor, ExecutionDispatcher, ExecutionTracker,
    LoopRunner, StaleExecutionWatchdog, TransportLauncher, BACKGROUND_LOCK,
    CAPACITY_DISTRIBUTOR_LOCK, EVENTS_LOCK,
};
use riberry_domain::{EmailSender, ExecutionLifecycle, LoggingEmailSender};
use riberry_infrastructure::{DistributedLock, Infrastructure};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::app::RiberryApp;
use crate::builtin::register_builtin_tasks;
use crate::capacity::{CapacityAddon, CapacityStep, CAPACITY_LOCK};
use crate::context::WorkerServices;
use crate::executor::{ExecutorSettings, TaskExecutor};
use crate::external::ExternalTaskReceiver;
use crate::pool::WorkerPool;
use crate::scale::ScaleController;
use crate::shared_data::DataRefresher;

pub struct WorkerBuilder {
    config: AppConfig,
    infrastructure: Infrastructure,
    app: RiberryApp,
    email_sender: Arc<dyn EmailSender>,
    worker_uuid: Option<String>,
}

impl WorkerBuilder {
    pub fn new(config: AppConfig, infrastructure: Infrastructure, app: RiberryApp) -> Self {
        Self {
            config,
            infrastructure,
            app,
            email_sender: Arc::new(LoggingEmailSender),
            worker_uuid: None,
        }
    }

    pub fn email_sender(mut self, email_sender: Arc<dyn EmailSender>) -> Self {
        self.email_sender = email_sender;
        self
    }

    /// 固定伸缩组中的成员名
    pub fn worker_uuid(mut self, worker_uuid: impl Into<String>) -> Self {
        self.worker_uuid = Some(worker_uuid.into());
        self
    }

    pub fn build(self) -> RiberryResult<Worker> {
        let config = self.config;
        let infra = self.infrastructure;
        let instance_name = config
            .instance_name()
            .map_err(|e| RiberryError::Configuration(e.to_string()))?
            .to_string();
        let app_name = self.app.name().to_string();
        let repos = infra.repositories.clone();
        let store = infra.store.clone();
        let transport = infra.transport.clone();

        let (entry_points, mut tasks, events) = self.app.into_parts();
        let entry_points = Arc::new(entry_points);
        let events = Arc::new(events.with_resource_data(repos.resource_data.clone()));
        let lifecycle =
            ExecutionLifecycle::new(repos.clone()).with_completion_hook(events.clone());
        let router = TaskRouter::from_config(&config.transport);
        let tracker = ExecutionTracker::new(store.clone());

        register_builtin_tasks(
            &mut tasks,
            entry_points.clone(),
            events.clone(),
            Some(tracker.clone()),
        )?;

        let capacity = config
            .capacity
            .enabled
            .then(|| CapacityAddon::from_config(store.clone(), &config.capacity, &instance_name));

        let mut services = WorkerServices::new(
            instance_name.clone(),
            lifecycle.clone(),
            transport.clone(),
            router.clone(),
        );
        if let Some(addon) = &capacity {
            services = services.with_capacity(addon.clone());
        }
        let executor = Arc::new(TaskExecutor::new(
            tasks,
            Arc::new(services),
            ExecutorSettings::from(&config.transport),
        ));

        let external_queue = config.transport.external_queue.clone();
        let queues: Vec<String> = router
            .queues()
            .into_iter()
            .filter(|q| *q != external_queue)
            .collect();
        let prefetch_multiplier = config.transport.prefetch_multiplier.max(1) as usize;
        let pool = Arc::new(
            WorkerPool::new(
                executor.clone(),
                transport.clone(),
                queues,
                config.worker.concurrency as usize,
                prefetch_multiplier,
            )
            .with_poll_interval(Duration::from_millis(config.worker.poll_interval_ms)),
        );

        let background = &config.background;
        let lock = |name: &str, interval_ms: u64| {
            DistributedLock::new(store.clone(), name, Duration::from_millis(interval_ms))
                .with_min_interval(Duration::from_millis(background.min_lock_interval_ms))
                .with_hold(Duration::from_secs(background.lock_hold_seconds))
        };

        let mut loops = LoopRunner::new(Duration::from_millis(background.tick_interval_ms));
        if background.enabled {
            let launcher = entry_points.values().fold(
                TransportLauncher::new(transport.clone(), router.clone(), lifecycle.clone()),
                |launcher, entry| launcher.with_entry_point(entry.name.clone(), entry.stream.clone()),
            );
            let dispatcher = ExecutionDispatcher::new(
                lifecycle.clone(),
                tracker.clone(),
                Arc::new(launcher),
                background.heartbeat_offline_seconds,
            );
            let tasks = BackgroundTasks::new(instance_name.clone(), lifecycle.clone(), dispatcher)
                .with_watchdog(StaleExecutionWatchdog::new(tracker.clone(), lifecycle.clone()))
                .with_hook(Arc::new(DataRefresher::new(repos.clone(), events.clone())));
            loops = loops.add_step(
                lock(BACKGROUND_LOCK, background.background_lock_interval_ms),
                Arc::new(tasks),
            );
        }
        if background.events_enabled {
            loops = loops.add_step(
                lock(EVENTS_LOCK, background.events_lock_interval_ms),
                Arc::new(EventIngestor::new(
                    repos.clone(),
                    self.email_sender.clone(),
                    config.email.clone(),
                    background.events_batch_limit,
                )),
            );
        }
        if background.capacity_distributor_enabled {
            loops = loops.add_step(
                lock(
                    CAPACITY_DISTRIBUTOR_LOCK,
                    background.capacity_distributor_lock_interval_ms,
                ),
                Arc::new(CapacityDistributor::new(
                    repos.clone(),
                    background.heartbeat_offline_seconds,
                )),
            );
        }
        if let Some(addon) = capacity {
            loops = loops.add_step(
                lock(CAPACITY_LOCK, config.capacity.lock_interval_ms),
                Arc::new(CapacityStep::new(addon, repos.clone(), instance_name.clone())),
            );
        }

        let mut scale = ScaleController::new(
            config.worker.scale.clone(),
            instance_name.clone(),
            store.clone(),
            repos.clone(),
            transport.clone(),
            pool.clone(),
            prefetch_multiplier,
        )
        .with_ignore_queue(external_queue.clone());
        if let Some(worker_uuid) = self.worker_uuid {
            scale = scale.with_worker_uuid(worker_uuid);
        }

        let receiver = config.worker.receiver.then(|| {
            Arc::new(ExternalTaskReceiver::new(
                repos.clone(),
                instance_name.clone(),
                external_queue.clone(),
                pool.clone(),
            ))
        });

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Worker {
            app_name,
            instance_name,
            entry_points: entry_points.keys().cloned().collect(),
            executor,
            pool,
            loops: Arc::new(loops),
            scale: Arc::new(scale),
            receiver,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            running: Arc::new(RwLock::new(false)),
        })
    }
}

pub struct Worker {
    app_name: String,
    instance_name: String,
    entry_points: Vec<String>,
    executor: Arc<TaskExecutor>,
    pool: Arc<WorkerPool>,
    loops: Arc<LoopRunner>,
    scale: Arc<ScaleController>,
    receiver: Option<Arc<ExternalTaskReceiver>>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<RwLock<bool>>,
}

impl Worker {
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn loops(&self) -> &Arc<LoopRunner> {
        &self.loops
    }

    pub fn scale(&self) -> &Arc<ScaleController> {
        &self.scale
    }

    pub fn receiver(&self) -> Option<&Arc<ExternalTaskReceiver>> {
        self.receiver.as_ref()
    }

    pub fn entry_points(&self) -> &[String] {
        &self.entry_points
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub async fn start(&self) -> RiberryResult<()> {
        let mut running = self.running.write().await;
        if *running {
            return Err(RiberryError::Internal("工作进程已在运行".to_string()));
        }

        info!(
            app = %self.app_name,
            instance = %self.instance_name,
            entry_points = ?self.entry_points,
            tasks = ?self.executor.tasks().names(),
            "启动工作进程"
        );

        let mut handles = self.handles.lock().await;
        handles.push(self.pool.clone().spawn(self.shutdown_tx.subscribe()));
        handles.push(self.loops.clone().spawn(self.shutdown_tx.subscribe()));
        handles.push(self.scale.clone().spawn(self.shutdown_tx.subscribe()));
        if let Some(receiver) = &self.receiver {
            handles.push(receiver.clone().spawn(self.shutdown_tx.subscribe()));
        }

        *running = true;
        Ok(())
    }

    pub async fn stop(&self) -> RiberryResult<()> {
        let mut running = self.running.write().await;
        if !*running {
            return Ok(());
        }

        info!(instance = %self.instance_name, "停止工作进程");
        if self.shutdown_tx.send(()).is_err() {
            warn!("没有控制循环在接收关闭信号");
        }

        for handle in self.handles.lock().await.drain(..) {
            if let Err(e) = handle.await {
                warn!("控制循环退出异常: {}", e);
            }
        }
        self.pool.stop().await?;

        *running = false;
        info!(instance = %self.instance_name, "工作进程已停止");
        Ok(())
    }
}


//! 伸缩控制器
//!
//! 每个工作进程按调度参数 `concurrency` 计算目标并发，并与同一伸缩组内最近活跃的
//! 成员平分；空闲或被停用时目标归零并取消订阅普通队列。

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use riberry_core::{config::ScaleConfig, MessageQueue, RiberryResult, SharedStore};
use riberry_dispatcher::InstanceSnapshot;
use riberry_domain::Repositories;
use riberry_infrastructure::observability::SCALE_TARGET;
use riberry_infrastructure::DistributedLock;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::pool::ConsumerControl;

/// 组内按成员名排序后，第一个成员向上取整，其余向下取整
pub fn group_share(total: u32, members: &[String], member: &str) -> u32 {
    let mut sorted: Vec<&String> = members.iter().collect();
    sorted.sort();
    sorted.dedup();

    let Some(position) = sorted.iter().position(|m| m.as_str() == member) else {
        return 0;
    };
    let raw = total as f64 / sorted.len() as f64;
    if position == 0 {
        raw.ceil() as u32
    } else {
        raw.floor() as u32
    }
}

/// 活跃状态下的目标并发
pub fn compute_target(
    config: &ScaleConfig,
    concurrency: Option<u32>,
    initial: usize,
    members: &[String],
    member: &str,
) -> usize {
    let mut target = if config.enabled && !config.concurrency_parameter.is_empty() {
        let total = concurrency.unwrap_or(initial as u32);
        group_share(total, members, member) as usize
    } else {
        initial
    };

    if let Some(maximum) = config.maximum_concurrency {
        target = target.min(maximum as usize);
    }
    if let Some(minimum) = config.minimum_concurrency {
        target = target.max(minimum as usize);
    }
    target
}

#[derive(Debug, Default)]
struct ScaleState {
    initial: usize,
    target: Option<usize>,
    idle_counter: u32,
    is_active: bool,
    queues: BTreeSet<String>,
}

pub struct ScaleController {
    config: ScaleConfig,
    instance_name: String,
    worker_uuid: String,
    store: Arc<dyn SharedStore>,
    repos: Repositories,
    transport: Arc<dyn MessageQueue>,
    consumer: Arc<dyn ConsumerControl>,
    lock: DistributedLock,
    ignore_queues: HashSet<String>,
    prefetch_multiplier: usize,
    state: Mutex<ScaleState>,
    running: Arc<RwLock<bool>>,
}

impl ScaleController {
    pub fn new(
        config: ScaleConfig,
        instance_name: impl Into<String>,
        store: Arc<dyn SharedStore>,
        repos: Repositories,
        transport: Arc<dyn MessageQueue>,
        consumer: Arc<dyn ConsumerControl>,
        prefetch_multiplier: usize,
    ) -> Self {
        let lock = DistributedLock::new(
            store.clone(),
            format!("step:scale:{}", config.group),
            Duration::from_millis(config.lock_interval_ms),
        );
        Self {
            config,
            instance_name: instance_name.into(),
            worker_uuid: uuid::Uuid::new_v4().to_string(),
            store,
            repos,
            transport,
            consumer,
            lock,
            ignore_queues: HashSet::new(),
            prefetch_multiplier: prefetch_multiplier.max(1),
            state: Mutex::new(ScaleState::default()),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// 控制器从不订阅或取消这些队列
    pub fn with_ignore_queue(mut self, queue: impl Into<String>) -> Self {
        self.ignore_queues.insert(queue.into());
        self
    }

    pub fn with_worker_uuid(mut self, worker_uuid: impl Into<String>) -> Self {
        self.worker_uuid = worker_uuid.into();
        self
    }

    pub fn worker_uuid(&self) -> &str {
        &self.worker_uuid
    }

    pub fn log_key(&self) -> String {
        format!("{}:scale-groups:{}:log", self.instance_name, self.config.group)
    }

    pub fn active_key(&self) -> String {
        format!("{}:scale-groups:{}:active", self.instance_name, self.config.group)
    }

    pub async fn target(&self) -> Option<usize> {
        self.state.lock().await.target
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.is_active
    }

    /// 把最近窗口内报告过的成员安装为当前组
    pub async fn refresh_group(&self) -> RiberryResult<usize> {
        let now = self.store.time().await?;
        let window = self.config.member_window_seconds as f64;
        let members = self
            .store
            .zrange_by_score(&self.log_key(), now - window, now)
            .await?;
        if !members.is_empty() {
            self.store.replace_set(&self.active_key(), &members).await?;
        }
        debug!(group = %self.config.group, members = members.len(), "已刷新伸缩组成员");
        Ok(members.len())
    }

    async fn report(&self) -> RiberryResult<()> {
        let now = self.store.time().await?;
        self.store
            .zadd(&self.log_key(), &[(self.worker_uuid.clone(), now)])
            .await
    }

    async fn tasks_available(&self, queues: &BTreeSet<String>) -> RiberryResult<bool> {
        if self.consumer.reserved_count().await > 0 || self.consumer.active_count().await > 0 {
            return Ok(true);
        }
        for queue in queues.iter().filter(|q| !self.ignore_queues.contains(*q)) {
            if self.transport.get_queue_size(queue).await? > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// 重新计算目标并发
    pub async fn update(&self) -> RiberryResult<Option<usize>> {
        let current_queues = self.consumer.queues().await;
        let pool_size = self.consumer.pool_size().await;
        let queues = {
            let mut state = self.state.lock().await;
            state.queues.extend(current_queues);
            if state.initial == 0 {
                state.initial = pool_size;
            }
            state.queues.clone()
        };

        let snapshot = InstanceSnapshot::load(&self.repos, &self.instance_name).await?;
        let active_flag = snapshot.value_or(&self.config.active_parameter, "Y") == "Y";
        let tasks_available = self.tasks_available(&queues).await?;
        if tasks_available {
            self.report().await?;
        }

        let is_active = active_flag && (tasks_available || !self.config.check_queues);
        let mut state = self.state.lock().await;
        state.is_active = is_active;

        if !is_active {
            if state.idle_counter > self.config.idle_threshold || state.target.is_none() {
                state.target = Some(0);
            }
            state.idle_counter += 1;
            return Ok(state.target);
        }
        state.idle_counter = 0;

        let members = self.store.smembers(&self.active_key()).await?;
        let concurrency = snapshot
            .value(&self.config.concurrency_parameter)
            .and_then(|v| v.trim().parse::<u32>().ok());
        let target = compute_target(
            &self.config,
            concurrency,
            state.initial,
            &members,
            &self.worker_uuid,
        );

        if state.target != Some(target) {
            info!(target, previous = ?state.target, members = members.len(), "伸缩目标变化");
            metrics::gauge!(SCALE_TARGET).set(target as f64);
        }
        state.target = Some(target);
        Ok(state.target)
    }

    /// 让消费者向目标收敛一步
    pub async fn scale(&self) -> RiberryResult<()> {
        let (target, known_queues) = {
            let state = self.state.lock().await;
            (state.target, state.queues.clone())
        };
        let Some(target) = target else {
            return Ok(());
        };

        let subscribed = self.consumer.queues().await;
        if target == 0 {
            for queue in subscribed.iter().filter(|q| !self.ignore_queues.contains(*q)) {
                self.consumer.cancel_queue(queue).await;
            }
        } else {
            for queue in known_queues
                .iter()
                .filter(|q| !subscribed.contains(*q) && !self.ignore_queues.contains(*q))
            {
                self.consumer.add_queue(queue).await;
            }
        }

        let actual = self.consumer.pool_size().await;
        let max_step = self.config.max_step.max(1) as usize;
        if target > actual {
            let step = if actual == 0 { 1 } else { (target - actual).min(max_step) };
            self.consumer.grow(step).await;
            let pool_size = self.consumer.pool_size().await;
            info!(pool_size, target, "扩大并发");
        } else if actual > target {
            self.consumer.shrink((actual - target).min(max_step)).await;
            let pool_size = self.consumer.pool_size().await;
            info!(pool_size, target, "缩小并发");
        }

        let prefetch_target = (self.consumer.pool_size().await * self.prefetch_multiplier).max(1);
        if self.consumer.prefetch().await != prefetch_target {
            self.consumer.set_prefetch(prefetch_target).await;
            debug!(prefetch = prefetch_target, "调整预取数");
        }
        Ok(())
    }

    pub async fn tick(&self) -> RiberryResult<()> {
        match self.lock.run(|| self.refresh_group()).await {
            Ok(Some(Err(e))) | Err(e) => {
                error!(lock = self.lock.name(), "刷新伸缩组失败: {}", e)
            }
            _ => {}
        }
        self.update().await?;
        self.scale().await
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub fn spawn(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            *self.running.write().await = true;
            info!(group = %self.config.group, worker = %self.worker_uuid, "启动伸缩控制器");

            let mut interval = tokio::time::interval(Duration::from_millis(self.config.interval_ms));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.tick().await {
                            error!("伸缩控制失败: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("伸缩控制器收到关闭信号");
                        break;
                    }
                }
            }

            *self.running.write().await = false;
        })
    }
}

//! 工作进程的消费池
//!
//! 从订阅的队列中预取消息放入保留缓冲，再在并发上限内派发给执行器。订阅队列、
//! 池大小和预取数都可以在运行时调整，由伸缩控制器和外部任务接收循环驱动。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use riberry_core::{MessageQueue, RiberryResult, TaskMessage};
use riberry_infrastructure::observability::WORKER_CONCURRENCY;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::executor::TaskExecutor;

/// 运行时调整消费者的接口
#[async_trait]
pub trait ConsumerControl: Send + Sync {
    async fn queues(&self) -> Vec<String>;
    async fn add_queue(&self, queue: &str);
    async fn cancel_queue(&self, queue: &str);
    async fn pool_size(&self) -> usize;
    async fn grow(&self, n: usize);
    async fn shrink(&self, n: usize);
    async fn prefetch(&self) -> usize;
    async fn set_prefetch(&self, prefetch: usize);
    /// 已预取但尚未开始执行的消息数
    async fn reserved_count(&self) -> usize;
    async fn active_count(&self) -> usize;
}

#[derive(Debug)]
struct PoolState {
    queues: Vec<String>,
    pool_size: usize,
    prefetch: usize,
    reserved: VecDeque<(String, TaskMessage)>,
}

pub struct WorkerPool {
    executor: Arc<TaskExecutor>,
    transport: Arc<dyn MessageQueue>,
    state: Arc<Mutex<PoolState>>,
    running_tasks: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
    poll_interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl WorkerPool {
    pub fn new(
        executor: Arc<TaskExecutor>,
        transport: Arc<dyn MessageQueue>,
        queues: Vec<String>,
        concurrency: usize,
        prefetch_multiplier: usize,
    ) -> Self {
        metrics::gauge!(WORKER_CONCURRENCY).set(concurrency as f64);
        Self {
            executor,
            transport,
            state: Arc::new(Mutex::new(PoolState {
                queues,
                pool_size: concurrency,
                prefetch: (concurrency * prefetch_multiplier).max(1),
                reserved: VecDeque::new(),
            })),
            running_tasks: Arc::new(RwLock::new(HashMap::new())),
            poll_interval: Duration::from_millis(100),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 预取并派发一轮，返回本轮开始执行的消息数
    pub async fn poll_once(&self) -> RiberryResult<usize> {
        self.reserve().await?;

        let mut dispatched = 0;
        loop {
            let active = self.running_tasks.read().await.len();
            let next = {
                let mut state = self.state.lock().await;
                if active >= state.pool_size {
                    None
                } else {
                    state.reserved.pop_front()
                }
            };
            let Some((_, message)) = next else {
                break;
            };
            self.spawn_task(message).await;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// 依次轮询订阅的队列直到保留缓冲达到预取数
    async fn reserve(&self) -> RiberryResult<()> {
        let (queues, mut room) = {
            let state = self.state.lock().await;
            if state.pool_size == 0 {
                return Ok(());
            }
            (
                state.queues.clone(),
                state.prefetch.saturating_sub(state.reserved.len()),
            )
        };

        while room > 0 {
            let mut fetched = false;
            for queue in &queues {
                if room == 0 {
                    break;
                }
                if let Some(message) = self.transport.consume_message(queue).await? {
                    debug!(queue = %queue, task = %message.task_name, task_id = %message.id, "已预取消息");
                    self.state
                        .lock()
                        .await
                        .reserved
                        .push_back((queue.clone(), message));
                    room -= 1;
                    fetched = true;
                }
            }
            if !fetched {
                break;
            }
        }
        Ok(())
    }

    async fn spawn_task(&self, message: TaskMessage) {
        let task_id = message.id.clone();
        let executor = Arc::clone(&self.executor);
        let running_tasks = Arc::clone(&self.running_tasks);

        let mut tasks = self.running_tasks.write().await;
        let id = task_id.clone();
        let handle = tokio::spawn(async move {
            executor.execute(message).await;
            running_tasks.write().await.remove(&id);
        });
        tasks.insert(task_id, handle);
    }

    /// 等待执行中的任务全部结束
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.running_tasks.read().await.is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn spawn(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            *self.running.write().await = true;
            let queues = self.queues().await;
            let pool_size = self.pool_size().await;
            info!(queues = ?queues, pool_size, "启动消费池");

            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.poll_once().await {
                            error!("消费消息失败: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("消费池收到关闭信号");
                        break;
                    }
                }
            }

            *self.running.write().await = false;
        })
    }

    /// 归还保留的消息并等待执行中的任务
    pub async fn stop(&self) -> RiberryResult<()> {
        let reserved: Vec<(String, TaskMessage)> =
            self.state.lock().await.reserved.drain(..).collect();
        for (queue, message) in &reserved {
            if let Err(e) = self.transport.publish_message(queue, message).await {
                error!(task_id = %message.id, "归还保留消息失败: {}", e);
            }
        }
        if !reserved.is_empty() {
            info!(count = reserved.len(), "已归还保留的消息");
        }

        let mut wait_count = 0;
        while !self.running_tasks.read().await.is_empty() {
            if wait_count >= 30 {
                let remaining = self.running_tasks.read().await.len();
                warn!("等待任务完成超时，仍有 {} 个任务在执行", remaining);
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            wait_count += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl ConsumerControl for WorkerPool {
    async fn queues(&self) -> Vec<String> {
        self.state.lock().await.queues.clone()
    }

    async fn add_queue(&self, queue: &str) {
        let mut state = self.state.lock().await;
        if !state.queues.iter().any(|q| q == queue) {
            state.queues.push(queue.to_string());
            info!(queue = %queue, "订阅队列");
        }
    }

    async fn cancel_queue(&self, queue: &str) {
        let mut state = self.state.lock().await;
        let before = state.queues.len();
        state.queues.retain(|q| q != queue);
        if state.queues.len() != before {
            info!(queue = %queue, "取消订阅队列");
        }
    }

    async fn pool_size(&self) -> usize {
        self.state.lock().await.pool_size
    }

    async fn grow(&self, n: usize) {
        let mut state = self.state.lock().await;
        state.pool_size += n;
        metrics::gauge!(WORKER_CONCURRENCY).set(state.pool_size as f64);
        debug!(pool_size = state.pool_size, "扩大消费池");
    }

    async fn shrink(&self, n: usize) {
        let mut state = self.state.lock().await;
        state.pool_size = state.pool_size.saturating_sub(n);
        metrics::gauge!(WORKER_CONCURRENCY).set(state.pool_size as f64);
        debug!(pool_size = state.pool_size, "缩小消费池");
    }

    async fn prefetch(&self) -> usize {
        self.state.lock().await.prefetch
    }

    async fn set_prefetch(&self, prefetch: usize) {
        self.state.lock().await.prefetch = prefetch;
    }

    async fn reserved_count(&self) -> usize {
        self.state.lock().await.reserved.len()
    }

    async fn active_count(&self) -> usize {
        self.running_tasks.read().await.len()
    }
}

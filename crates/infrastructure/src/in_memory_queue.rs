use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use riberry_core::{MessageQueue, RiberryError, RiberryResult, TaskMessage};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 内存消息队列实现
///
/// 每个队列是一个按优先级排序的堆，延迟消息在到期后才进入堆中，适用于单进程部署与测试。
#[derive(Debug, Clone)]
pub struct InMemoryMessageQueue {
    queues: Arc<RwLock<HashMap<String, QueueState>>>,
    config: InMemoryQueueConfig,
    sequence: Arc<AtomicU64>,
}

#[derive(Debug, Clone)]
pub struct InMemoryQueueConfig {
    /// 队列最大容量（0表示无限制）
    pub max_queue_size: usize,
}

impl Default for InMemoryQueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000, // 默认最大10000条消息
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    ready: BinaryHeap<QueuedMessage>,
    delayed: Vec<(DateTime<Utc>, u64, TaskMessage)>,
}

#[derive(Debug)]
struct QueuedMessage {
    priority: u8,
    sequence: Reverse<u64>,
    message: TaskMessage,
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedMessage {}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl QueueState {
    fn len(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    fn promote_due(&mut self, now: DateTime<Utc>) {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.delayed)
            .into_iter()
            .partition(|(eta, _, _)| *eta <= now);
        self.delayed = pending;
        for (_, sequence, message) in due {
            self.ready.push(QueuedMessage {
                priority: message.priority,
                sequence: Reverse(sequence),
                message,
            });
        }
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageQueue {
    /// 创建新的内存消息队列实例
    pub fn new() -> Self {
        Self::with_config(InMemoryQueueConfig::default())
    }

    /// 使用指定配置创建内存消息队列实例
    pub fn with_config(config: InMemoryQueueConfig) -> Self {
        info!("Creating in-memory message queue with config: {:?}", config);
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            config,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, AtomicOrdering::SeqCst)
    }

    async fn enqueue(
        &self,
        queue: &str,
        message: &TaskMessage,
        eta: Option<DateTime<Utc>>,
    ) -> RiberryResult<()> {
        let sequence = self.next_sequence();
        let mut queues = self.queues.write().await;
        let state = queues.entry(queue.to_string()).or_default();

        if self.config.max_queue_size > 0 && state.len() >= self.config.max_queue_size {
            warn!("Queue {} is full ({} messages)", queue, state.len());
            return Err(RiberryError::Transport(format!("队列 {queue} 已满")));
        }

        match eta {
            Some(eta) if eta > Utc::now() => {
                state.delayed.push((eta, sequence, message.clone()));
            }
            _ => state.ready.push(QueuedMessage {
                priority: message.priority,
                sequence: Reverse(sequence),
                message: message.clone(),
            }),
        }

        debug!("Published message {} to queue {}", message.id, queue);
        Ok(())
    }

    /// 所有已知队列的名称
    pub async fn queue_names(&self) -> Vec<String> {
        let queues = self.queues.read().await;
        let mut names: Vec<String> = queues.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish_message(&self, queue: &str, message: &TaskMessage) -> RiberryResult<()> {
        self.enqueue(queue, message, message.eta).await
    }

    async fn publish_delayed(
        &self,
        queue: &str,
        message: &TaskMessage,
        delay: Duration,
    ) -> RiberryResult<()> {
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| RiberryError::Transport(format!("无效的延迟时间: {e}")))?;
        self.enqueue(queue, message, Some(Utc::now() + delay)).await
    }

    async fn consume_message(&self, queue: &str) -> RiberryResult<Option<TaskMessage>> {
        let mut queues = self.queues.write().await;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(None);
        };
        state.promote_due(Utc::now());
        Ok(state.ready.pop().map(|queued| queued.message))
    }

    async fn get_queue_size(&self, queue: &str) -> RiberryResult<u64> {
        let mut queues = self.queues.write().await;
        Ok(queues
            .get_mut(queue)
            .map(|state| {
                state.promote_due(Utc::now());
                state.ready.len() as u64
            })
            .unwrap_or(0))
    }

    async fn purge_queue(&self, queue: &str) -> RiberryResult<()> {
        let mut queues = self.queues.write().await;
        if let Some(state) = queues.get_mut(queue) {
            let purged = state.len();
            *state = QueueState::default();
            info!("Purged {} messages from queue {}", purged, queue);
        }
        Ok(())
    }
}

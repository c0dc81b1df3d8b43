//! 任务前后的执行流与步骤事件

use std::collections::{HashSet, VecDeque};

use riberry_core::{RiberryResult, TaskMessage};
use riberry_domain::{ExecutionLifecycle, NewEvent, StreamStatus};
use tokio::sync::Mutex;
use tracing::debug;

use crate::context::TaskContext;

/// 进程内去重缓存的容量
pub const EMITTED_CACHE_CAPACITY: usize = 10_000;

/// 任务结束时的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Success,
    Failure,
    /// 任务被忽略，对外视为成功
    Ignored,
}

impl TaskState {
    pub fn stream_status(self) -> StreamStatus {
        match self {
            TaskState::Success | TaskState::Ignored => StreamStatus::Success,
            TaskState::Failure => StreamStatus::Failure,
        }
    }
}

type EmittedKey = (String, String, StreamStatus);

/// 按插入顺序淘汰的有界集合
#[derive(Debug)]
struct EmittedCache {
    capacity: usize,
    order: VecDeque<EmittedKey>,
    seen: HashSet<EmittedKey>,
}

impl EmittedCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// 首次出现时返回 true
    fn insert(&mut self, key: EmittedKey) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

pub struct StreamEventEmitter {
    lifecycle: ExecutionLifecycle,
    emitted: Mutex<EmittedCache>,
}

impl StreamEventEmitter {
    pub fn new(lifecycle: ExecutionLifecycle) -> Self {
        Self::with_capacity(lifecycle, EMITTED_CACHE_CAPACITY)
    }

    pub fn with_capacity(lifecycle: ExecutionLifecycle, capacity: usize) -> Self {
        Self {
            lifecycle,
            emitted: Mutex::new(EmittedCache::new(capacity.max(1))),
        }
    }

    pub async fn cached_len(&self) -> usize {
        self.emitted.lock().await.len()
    }

    async fn emit_stream(
        &self,
        root_id: &str,
        task_id: &str,
        stream: &str,
        state: StreamStatus,
    ) -> RiberryResult<()> {
        let first = self.emitted.lock().await.insert((
            root_id.to_string(),
            stream.to_string(),
            state,
        ));
        if !first {
            debug!(root_id = %root_id, stream = %stream, state = %state.as_str(), "执行流事件已发出，跳过");
            return Ok(());
        }
        self.lifecycle
            .emit(NewEvent::stream(root_id, task_id, stream, state))
            .await?;
        Ok(())
    }

    /// 发布子任务时记录排队状态
    pub async fn on_publish(&self, root_id: &str, message: &TaskMessage) -> RiberryResult<()> {
        let Some(stream) = message.properties.stream.as_deref() else {
            return Ok(());
        };
        self.lifecycle
            .emit(NewEvent::stream(root_id, &message.id, stream, StreamStatus::Queued))
            .await?;
        if let Some(step) = message.properties.step.as_deref() {
            self.lifecycle
                .emit(NewEvent::step(root_id, &message.id, stream, step, StreamStatus::Queued))
                .await?;
        }
        Ok(())
    }

    /// 用户代码运行前
    pub async fn task_prerun(&self, ctx: &TaskContext) -> RiberryResult<()> {
        let Some(stream) = ctx.stream.as_deref() else {
            return Ok(());
        };

        if ctx.properties.stream_start {
            self.emit_stream(&ctx.root_id, &ctx.task_id, stream, StreamStatus::Active)
                .await?;
        }

        if let Some(step) = ctx.step.as_deref() {
            self.lifecycle
                .emit(NewEvent::step(
                    &ctx.root_id,
                    &ctx.task_id,
                    stream,
                    step,
                    StreamStatus::Active,
                ))
                .await?;
        }
        Ok(())
    }

    /// 用户代码运行后，重试时不调用
    pub async fn task_postrun(&self, ctx: &TaskContext, state: TaskState) -> RiberryResult<()> {
        let Some(stream) = ctx.stream.as_deref() else {
            return Ok(());
        };

        if ctx.properties.stream_start && state == TaskState::Failure {
            self.emit_stream(&ctx.root_id, &ctx.task_id, stream, StreamStatus::Failure)
                .await?;
        }

        if ctx.properties.stream_end {
            self.emit_stream(&ctx.root_id, &ctx.task_id, stream, state.stream_status())
                .await?;
        }

        if let Some(step) = ctx.step.as_deref() {
            self.lifecycle
                .emit(NewEvent::step(
                    &ctx.root_id,
                    &ctx.task_id,
                    stream,
                    step,
                    state.stream_status(),
                ))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(root: &str) -> EmittedKey {
        (root.to_string(), "Overall".to_string(), StreamStatus::Active)
    }

    #[test]
    fn test_cache_deduplicates() {
        let mut cache = EmittedCache::new(10);
        assert!(cache.insert(key("a")));
        assert!(!cache.insert(key("a")));
        assert!(cache.insert(("a".into(), "Overall".into(), StreamStatus::Success)));
    }

    #[test]
    fn test_cache_evicts_in_insertion_order() {
        let mut cache = EmittedCache::new(2);
        cache.insert(key("a"));
        cache.insert(key("b"));
        cache.insert(key("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.insert(key("a")));
        assert!(!cache.insert(key("c")));
    }

    #[test]
    fn test_ignored_maps_to_success() {
        assert_eq!(TaskState::Ignored.stream_status(), StreamStatus::Success);
        assert_eq!(TaskState::Failure.stream_status(), StreamStatus::Failure);
    }
}

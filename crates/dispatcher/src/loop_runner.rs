//! 周期性控制循环

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use riberry_core::RiberryResult;
use riberry_infrastructure::DistributedLock;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// 在分布式锁下周期运行的一步工作
#[async_trait]
pub trait PeriodicStep: Send + Sync {
    fn name(&self) -> &str;

    async fn run_once(&self) -> RiberryResult<()>;
}

/// 按固定节拍驱动一组 [`PeriodicStep`]
///
/// 每一步都有自己的锁槽位；锁决定集群内实际的执行频率，节拍只决定尝试的频率。
pub struct LoopRunner {
    tick: Duration,
    steps: Vec<(DistributedLock, Arc<dyn PeriodicStep>)>,
    running: Arc<RwLock<bool>>,
}

impl LoopRunner {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            steps: Vec::new(),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn add_step(mut self, lock: DistributedLock, step: Arc<dyn PeriodicStep>) -> Self {
        self.steps.push((lock, step));
        self
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 尝试运行每一步一次，返回实际获得锁的步数
    pub async fn tick_once(&self) -> usize {
        let mut executed = 0;
        for (lock, step) in &self.steps {
            match lock.run(|| step.run_once()).await {
                Ok(Some(Ok(()))) => executed += 1,
                Ok(Some(Err(e))) => {
                    executed += 1;
                    error!(step = step.name(), "控制循环执行失败: {}", e);
                }
                Ok(None) => debug!(step = step.name(), "未获得锁，跳过本轮"),
                Err(e) => error!(step = step.name(), lock = lock.name(), "获取分布式锁失败: {}", e),
            }
        }
        executed
    }

    /// 在后台运行，收到关闭信号后退出
    pub fn spawn(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            *self.running.write().await = true;
            info!(steps = self.steps.len(), "启动后台控制循环");

            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.tick_once().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("后台控制循环收到关闭信号");
                        break;
                    }
                }
            }

            *self.running.write().await = false;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riberry_core::RiberryError;
    use riberry_infrastructure::InMemorySharedStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting {
        runs: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl PeriodicStep for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run_once(&self) -> RiberryResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RiberryError::Internal("boom".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_steps_are_throttled_by_their_lock() {
        let store = Arc::new(InMemorySharedStore::new());
        let step = Arc::new(Counting {
            runs: AtomicU32::new(0),
            fail: false,
        });
        let runner = LoopRunner::new(Duration::from_millis(10)).add_step(
            DistributedLock::new(store, "step:counting", Duration::from_secs(60)),
            step.clone(),
        );

        assert_eq!(runner.tick_once().await, 1);
        assert_eq!(runner.tick_once().await, 0);
        assert_eq!(step.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_step_does_not_stop_others() {
        let store = Arc::new(InMemorySharedStore::new());
        let failing = Arc::new(Counting {
            runs: AtomicU32::new(0),
            fail: true,
        });
        let healthy = Arc::new(Counting {
            runs: AtomicU32::new(0),
            fail: false,
        });
        let runner = LoopRunner::new(Duration::from_millis(10))
            .add_step(
                DistributedLock::new(store.clone(), "step:a", Duration::from_secs(60)),
                failing.clone(),
            )
            .add_step(
                DistributedLock::new(store, "step:b", Duration::from_secs(60)),
                healthy.clone(),
            );

        assert_eq!(runner.tick_once().await, 2);
        assert_eq!(healthy.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let runner = Arc::new(LoopRunner::new(Duration::from_millis(10)));
        let (tx, rx) = broadcast::channel(1);
        let handle = runner.clone().spawn(rx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(runner.is_running().await);
        tx.send(()).unwrap();
        handle.await.unwrap();
        assert!(!runner.is_running().await);
    }
}

use serde::{Deserialize, Serialize};

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 启动时的并发数，同时也是扩缩容关闭时的目标值
    pub concurrency: u32,
    /// 以外部任务接收者身份运行
    pub receiver: bool,
    pub poll_interval_ms: u64,
    pub scale: ScaleConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            receiver: false,
            poll_interval_ms: 100,
            scale: ScaleConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("任务轮询间隔必须大于0"));
        }
        self.scale.validate()
    }
}

/// Scale controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    pub enabled: bool,
    pub group: String,
    pub concurrency_parameter: String,
    pub active_parameter: String,
    pub minimum_concurrency: Option<u32>,
    pub maximum_concurrency: Option<u32>,
    /// 为false时，无论队列是否为空都视为有任务
    pub check_queues: bool,
    pub interval_ms: u64,
    pub lock_interval_ms: u64,
    /// 每个tick最多增减的工作单元数
    pub max_step: u32,
    /// 连续空闲多少个tick后目标值归零
    pub idle_threshold: u32,
    /// 组成员的活跃窗口（秒）
    pub member_window_seconds: u64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            group: "default".to_string(),
            concurrency_parameter: "concurrency".to_string(),
            active_parameter: "active".to_string(),
            minimum_concurrency: None,
            maximum_concurrency: None,
            check_queues: true,
            interval_ms: 1000,
            lock_interval_ms: 5000,
            max_step: 8,
            idle_threshold: 10,
            member_window_seconds: 60,
        }
    }
}

impl ScaleConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let (Some(min), Some(max)) = (self.minimum_concurrency, self.maximum_concurrency) {
            if min > max {
                return Err(anyhow::anyhow!(
                    "最小并发数({})不能大于最大并发数({})",
                    min,
                    max
                ));
            }
        }

        if self.group.is_empty() {
            return Err(anyhow::anyhow!("扩缩容组名不能为空"));
        }

        if self.interval_ms == 0 || self.lock_interval_ms == 0 {
            return Err(anyhow::anyhow!("扩缩容间隔必须大于0"));
        }

        if self.max_step == 0 {
            return Err(anyhow::anyhow!("单次扩缩步长必须大于0"));
        }

        Ok(())
    }
}

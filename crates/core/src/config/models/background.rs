use serde::{Deserialize, Serialize};

/// Timed background work, each slot guarded by its own distributed lock
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub enabled: bool,
    /// 各控制循环的tick间隔
    pub tick_interval_ms: u64,
    /// `step:background` 锁间隔（心跳、调度、过期检测、共享数据刷新）
    pub background_lock_interval_ms: u64,
    pub events_enabled: bool,
    pub events_lock_interval_ms: u64,
    pub events_batch_limit: Option<u32>,
    pub capacity_distributor_enabled: bool,
    pub capacity_distributor_lock_interval_ms: u64,
    /// 锁超时键的最小过期时间
    pub min_lock_interval_ms: u64,
    /// 分布式锁持有时间
    pub lock_hold_seconds: u64,
    /// 心跳超过此时长视为离线
    pub heartbeat_offline_seconds: i64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: 1000,
            background_lock_interval_ms: 900,
            events_enabled: true,
            events_lock_interval_ms: 900,
            events_batch_limit: Some(1000),
            capacity_distributor_enabled: true,
            capacity_distributor_lock_interval_ms: 5000,
            min_lock_interval_ms: 100,
            lock_hold_seconds: 60,
            heartbeat_offline_seconds: 10,
        }
    }
}

impl BackgroundConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(anyhow::anyhow!("后台tick间隔必须大于0"));
        }

        if self.background_lock_interval_ms == 0
            || self.events_lock_interval_ms == 0
            || self.capacity_distributor_lock_interval_ms == 0
        {
            return Err(anyhow::anyhow!("分布式锁间隔必须大于0"));
        }

        if self.lock_hold_seconds == 0 {
            return Err(anyhow::anyhow!("锁持有时间必须大于0"));
        }

        if self.heartbeat_offline_seconds <= 0 {
            return Err(anyhow::anyhow!("离线阈值必须大于0"));
        }

        if self.events_batch_limit == Some(0) {
            return Err(anyhow::anyhow!("事件批量大小必须大于0"));
        }

        Ok(())
    }
}

/// Worker-side capacity addon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    pub enabled: bool,
    /// 读取生产者分配的调度参数
    pub parameter: String,
    /// 优先队列的逻辑键，缺省为实例名
    pub key: Option<String>,
    pub prefix: String,
    pub separator: String,
    pub blocking: bool,
    pub block_retry_ms: u64,
    pub lock_interval_ms: u64,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            parameter: "producer".to_string(),
            key: None,
            prefix: "pq".to_string(),
            separator: "|".to_string(),
            blocking: true,
            block_retry_ms: 500,
            lock_interval_ms: 900,
        }
    }
}

impl CapacityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.parameter.is_empty() {
            return Err(anyhow::anyhow!("容量参数名不能为空"));
        }
        if self.prefix.is_empty() || self.separator.is_empty() {
            return Err(anyhow::anyhow!("优先队列前缀和分隔符不能为空"));
        }
        if self.block_retry_ms == 0 {
            return Err(anyhow::anyhow!("阻塞重试间隔必须大于0"));
        }
        Ok(())
    }
}

/// Email notification collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub sender: String,
    pub smtp_server: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sender: "riberry@localhost".to_string(),
            smtp_server: None,
        }
    }
}

impl EmailConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && !self.sender.contains('@') {
            return Err(anyhow::anyhow!("发件人地址无效: {}", self.sender));
        }
        Ok(())
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Shared-resource store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout_seconds: 5,
        }
    }
}

impl RedisConfig {
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory://")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("Redis URL不能为空"));
        }
        if !self.url.starts_with("redis://")
            && !self.url.starts_with("rediss://")
            && !self.is_memory()
        {
            return Err(anyhow::anyhow!("Redis URL格式无效: {}", self.url));
        }
        Ok(())
    }
}

/// Task transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// `redis` 或 `memory`
    pub backend: String,
    pub default_queue: String,
    /// 外部任务接收队列，扩缩容控制器永远不会操作此队列
    pub external_queue: String,
    /// 任务名 -> 队列名
    pub routes: HashMap<String, String>,
    pub prefetch_multiplier: u32,
    pub default_retry_delay_seconds: u64,
    pub default_max_retries: u32,
    /// 软超时（秒），超过后任务被中断但不走fallback
    pub soft_time_limit_seconds: Option<u64>,
    pub time_limit_seconds: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backend: "redis".to_string(),
            default_queue: "rib.default".to_string(),
            external_queue: "rib.external".to_string(),
            routes: HashMap::new(),
            prefetch_multiplier: 1,
            default_retry_delay_seconds: 3,
            default_max_retries: 3,
            soft_time_limit_seconds: None,
            time_limit_seconds: None,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.backend.as_str() {
            "redis" | "memory" => {}
            other => return Err(anyhow::anyhow!("不支持的传输后端: {}", other)),
        }

        if self.default_queue.is_empty() || self.external_queue.is_empty() {
            return Err(anyhow::anyhow!("队列名称不能为空"));
        }

        if self.default_queue == self.external_queue {
            return Err(anyhow::anyhow!("默认队列与外部任务队列不能相同"));
        }

        if self.prefetch_multiplier == 0 {
            return Err(anyhow::anyhow!("预取倍数必须大于0"));
        }

        if let (Some(soft), Some(hard)) = (self.soft_time_limit_seconds, self.time_limit_seconds) {
            if soft > hard {
                return Err(anyhow::anyhow!("软超时不能大于硬超时"));
            }
        }

        Ok(())
    }
}

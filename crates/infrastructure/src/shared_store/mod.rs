//! 共享资源存储（SRS）实现

pub mod memory;
pub mod redis_store;

pub use memory::InMemorySharedStore;
pub use redis_store::RedisSharedStore;

use std::sync::Arc;

use riberry_core::{RedisConfig, RiberryResult, SharedStore};
use tracing::info;

/// 按配置创建共享存储，`memory://` 使用进程内实现
pub async fn create_shared_store(config: &RedisConfig) -> RiberryResult<Arc<dyn SharedStore>> {
    if config.is_memory() {
        info!("使用进程内共享存储");
        return Ok(Arc::new(InMemorySharedStore::new()));
    }

    info!("连接Redis共享存储: {}", config.url);
    Ok(Arc::new(RedisSharedStore::connect(config).await?))
}

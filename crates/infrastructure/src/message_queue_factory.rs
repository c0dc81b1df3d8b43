use std::sync::Arc;

use riberry_core::{config::TransportConfig, MessageQueue, RedisConfig, RiberryResult};
use tracing::{debug, info};

use crate::{InMemoryMessageQueue, RedisMessageQueue};

pub struct MessageQueueFactory;

impl MessageQueueFactory {
    /// 按 `transport.backend` 创建任务传输
    pub async fn create(
        transport: &TransportConfig,
        redis: &RedisConfig,
    ) -> RiberryResult<Arc<dyn MessageQueue>> {
        debug!("Creating task transport with backend: {}", transport.backend);

        if transport.backend == "memory" || redis.is_memory() {
            info!("使用进程内任务传输");
            return Ok(Arc::new(InMemoryMessageQueue::new()));
        }

        info!("Initializing Redis task transport");
        Ok(Arc::new(RedisMessageQueue::connect(redis).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_needs_no_connection() {
        let transport = TransportConfig {
            backend: "memory".to_string(),
            ..TransportConfig::default()
        };
        let queue = MessageQueueFactory::create(&transport, &RedisConfig::default())
            .await
            .unwrap();
        assert_eq!(queue.get_queue_size("rib.default").await.unwrap(), 0);
    }
}

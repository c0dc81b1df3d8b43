use std::time::Duration;

use async_trait::async_trait;

use crate::{models::TaskMessage, RiberryResult};

/// 任务传输抽象接口
///
/// 消息按优先级消费（数值大者优先），同优先级先进先出。
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// 发布消息到指定队列
    async fn publish_message(&self, queue: &str, message: &TaskMessage) -> RiberryResult<()>;

    /// 延迟发布，到期后才可被消费
    async fn publish_delayed(
        &self,
        queue: &str,
        message: &TaskMessage,
        delay: Duration,
    ) -> RiberryResult<()>;

    /// 非阻塞地取出一条消息
    async fn consume_message(&self, queue: &str) -> RiberryResult<Option<TaskMessage>>;

    /// 获取队列中可立即消费的消息数量
    async fn get_queue_size(&self, queue: &str) -> RiberryResult<u64>;

    /// 清空队列
    async fn purge_queue(&self, queue: &str) -> RiberryResult<()>;
}

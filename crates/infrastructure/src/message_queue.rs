use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use riberry_core::models::message::MAX_PRIORITY;
use riberry_core::{MessageQueue, RedisConfig, RiberryError, RiberryResult, TaskMessage};
use tracing::{debug, info, warn};

/// 依次尝试各优先级列表，返回第一条消息
const POP_FIRST: &str = r#"
for _, key in ipairs(KEYS) do
    local value = redis.call('RPOP', key)
    if value then return value end
end
return false
"#;

/// 取出并移除已到期的延迟消息
const TAKE_DUE: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, member in ipairs(due) do
    redis.call('ZREM', KEYS[1], member)
end
return due
"#;

const PROMOTE_BATCH: usize = 100;

/// 基于Redis列表的任务传输
///
/// 每个队列按优先级拆分为多个列表，延迟消息放在按到期时间排序的有序集合中，消费前先提升到期消息。
#[derive(Clone)]
pub struct RedisMessageQueue {
    connection: ConnectionManager,
    prefix: String,
}

impl RedisMessageQueue {
    pub async fn connect(config: &RedisConfig) -> RiberryResult<Self> {
        let client = Client::open(config.url.as_str())?;
        let connection = tokio::time::timeout(
            Duration::from_secs(config.connection_timeout_seconds),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| RiberryError::Transport(format!("连接Redis超时: {}", config.url)))??;

        info!("成功连接到Redis传输: {}", config.url);
        Ok(Self {
            connection,
            prefix: "riberry:queue".to_string(),
        })
    }

    fn bucket_key(&self, queue: &str, priority: u8) -> String {
        format!("{}:{}:{}", self.prefix, queue, priority.min(MAX_PRIORITY))
    }

    fn delayed_key(&self, queue: &str) -> String {
        format!("{}:{}:delayed", self.prefix, queue)
    }

    /// 高优先级在前
    fn bucket_keys(&self, queue: &str) -> Vec<String> {
        (0..=MAX_PRIORITY)
            .rev()
            .map(|priority| self.bucket_key(queue, priority))
            .collect()
    }

    async fn push(&self, queue: &str, message: &TaskMessage) -> RiberryResult<()> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(self.bucket_key(queue, message.priority))
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn schedule(&self, queue: &str, message: &TaskMessage, eta_epoch: f64) -> RiberryResult<()> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(self.delayed_key(queue))
            .arg(eta_epoch)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn promote_due(&self, queue: &str) -> RiberryResult<()> {
        let mut conn = self.connection.clone();
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        let due: Vec<String> = Script::new(TAKE_DUE)
            .key(self.delayed_key(queue))
            .arg(now)
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await?;

        for payload in due {
            match serde_json::from_str::<TaskMessage>(&payload) {
                Ok(message) => self.push(queue, &message).await?,
                Err(e) => warn!("丢弃无法解析的延迟消息: {}", e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for RedisMessageQueue {
    async fn publish_message(&self, queue: &str, message: &TaskMessage) -> RiberryResult<()> {
        match message.eta {
            Some(eta) if eta > Utc::now() => {
                self.schedule(queue, message, eta.timestamp_millis() as f64 / 1000.0)
                    .await?
            }
            _ => self.push(queue, message).await?,
        }
        debug!("Published message {} to queue {}", message.id, queue);
        Ok(())
    }

    async fn publish_delayed(
        &self,
        queue: &str,
        message: &TaskMessage,
        delay: Duration,
    ) -> RiberryResult<()> {
        let eta = Utc::now().timestamp_millis() as f64 / 1000.0 + delay.as_secs_f64();
        self.schedule(queue, message, eta).await
    }

    async fn consume_message(&self, queue: &str) -> RiberryResult<Option<TaskMessage>> {
        self.promote_due(queue).await?;

        let mut conn = self.connection.clone();
        let script = Script::new(POP_FIRST);
        let mut invocation = script.prepare_invoke();
        for key in self.bucket_keys(queue) {
            invocation.key(key);
        }
        let payload: Option<String> = invocation.invoke_async(&mut conn).await?;

        payload
            .map(|p| serde_json::from_str::<TaskMessage>(&p).map_err(RiberryError::from))
            .transpose()
    }

    async fn get_queue_size(&self, queue: &str) -> RiberryResult<u64> {
        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        for key in self.bucket_keys(queue) {
            pipe.cmd("LLEN").arg(key);
        }
        let sizes: Vec<u64> = pipe.query_async(&mut conn).await?;
        Ok(sizes.into_iter().sum())
    }

    async fn purge_queue(&self, queue: &str) -> RiberryResult<()> {
        let mut keys = self.bucket_keys(queue);
        keys.push(self.delayed_key(queue));
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        info!("Purged queue {}", queue);
        Ok(())
    }
}

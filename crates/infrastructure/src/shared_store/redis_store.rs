use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use riberry_core::{RedisConfig, RiberryError, RiberryResult, SharedStore};
use tracing::{debug, error};

const COMPARE_AND_SWAP: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
    if current ~= ARGV[2] then return 0 end
else
    if current then return 0 end
end
redis.call('SET', KEYS[1], ARGV[3])
return 1
"#;

const UNLOCK: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const ZMOVE_TOP: &str = r#"
local top = redis.call('ZREVRANGE', KEYS[1], 0, 0)
if #top == 0 then return false end
local member = top[1]
local score = redis.call('ZINCRBY', KEYS[1], -1, member)
redis.call('ZINCRBY', KEYS[2], 1, member)
return {member, score}
"#;

const ZMOVE: &str = r#"
redis.call('ZINCRBY', KEYS[1], -1, ARGV[1])
redis.call('ZINCRBY', KEYS[2], 1, ARGV[1])
return 1
"#;

const REPLACE_SET: &str = r#"
redis.call('DEL', KEYS[1])
if #ARGV > 0 then
    redis.call('SADD', KEYS[1], unpack(ARGV))
end
return 1
"#;

/// 基于Redis的共享资源存储
///
/// 多键原子操作通过Lua脚本在服务端执行。
#[derive(Clone)]
pub struct RedisSharedStore {
    connection: ConnectionManager,
}

impl RedisSharedStore {
    pub async fn connect(config: &RedisConfig) -> RiberryResult<Self> {
        let client = Client::open(config.url.as_str())?;
        let connect_timeout = Duration::from_secs(config.connection_timeout_seconds);

        let connection = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                error!("连接Redis超时: {}", config.url);
                RiberryError::StoreOperation(format!("连接Redis超时: {}", config.url))
            })??;

        let store = Self { connection };
        store.ping().await?;
        debug!("Redis connection test successful");
        Ok(store)
    }

    pub async fn ping(&self) -> RiberryResult<()> {
        let mut conn = self.connection.clone();
        let response: String = redis::cmd("PING").query_async(&mut conn).await?;
        if response != "PONG" {
            return Err(RiberryError::StoreOperation(format!(
                "Unexpected PING response: {response}"
            )));
        }
        Ok(())
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl SharedStore for RedisSharedStore {
    async fn get(&self, key: &str) -> RiberryResult<Option<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn set(&self, key: &str, value: &str) -> RiberryResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> RiberryResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms.max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> RiberryResult<bool> {
        let mut conn = self.conn();
        let count: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(count > 0)
    }

    async fn delete(&self, keys: &[String]) -> RiberryResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let _: i64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> RiberryResult<bool> {
        let mut conn = self.conn();
        let swapped: i64 = Script::new(COMPARE_AND_SWAP)
            .key(key)
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or(""))
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }

    async fn try_lock(&self, key: &str, token: &str, ttl_ms: u64) -> RiberryResult<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms.max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn unlock(&self, key: &str, token: &str) -> RiberryResult<bool> {
        let mut conn = self.conn();
        let released: i64 = Script::new(UNLOCK)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(released == 1)
    }

    async fn zadd(&self, key: &str, members: &[(String, f64)]) -> RiberryResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let mut cmd = redis::cmd("ZADD");
        cmd.arg(key);
        for (member, score) in members {
            cmd.arg(*score).arg(member);
        }
        let _: i64 = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn zscore(&self, key: &str, member: &str) -> RiberryResult<Option<f64>> {
        let mut conn = self.conn();
        Ok(redis::cmd("ZSCORE")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?)
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> RiberryResult<Vec<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .query_async(&mut conn)
            .await?)
    }

    async fn zrevrange_with_scores(&self, key: &str) -> RiberryResult<Vec<(String, f64)>> {
        let mut conn = self.conn();
        Ok(redis::cmd("ZREVRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?)
    }

    async fn zmove_top(&self, src: &str, dst: &str) -> RiberryResult<Option<(String, f64)>> {
        let mut conn = self.conn();
        let moved: Option<(String, String)> = Script::new(ZMOVE_TOP)
            .key(src)
            .key(dst)
            .invoke_async(&mut conn)
            .await?;

        match moved {
            Some((member, score)) => {
                let score = score.parse::<f64>().map_err(|e| {
                    RiberryError::StoreOperation(format!("无法解析有序集合分数 {score}: {e}"))
                })?;
                Ok(Some((member, score)))
            }
            None => Ok(None),
        }
    }

    async fn zmove(&self, src: &str, dst: &str, member: &str) -> RiberryResult<()> {
        let mut conn = self.conn();
        let _: i64 = Script::new(ZMOVE)
            .key(src)
            .key(dst)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> RiberryResult<()> {
        let mut conn = self.conn();
        let _: i64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> RiberryResult<()> {
        let mut conn = self.conn();
        let _: i64 = redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> RiberryResult<bool> {
        let mut conn = self.conn();
        let found: i64 = redis::cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(found == 1)
    }

    async fn smembers(&self, key: &str) -> RiberryResult<Vec<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await?)
    }

    async fn replace_set(&self, key: &str, members: &[String]) -> RiberryResult<()> {
        let mut conn = self.conn();
        let _: i64 = Script::new(REPLACE_SET)
            .key(key)
            .arg(members)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn time(&self) -> RiberryResult<f64> {
        let mut conn = self.conn();
        let (seconds, micros): (u64, u64) = redis::cmd("TIME").query_async(&mut conn).await?;
        Ok(seconds as f64 + micros as f64 / 1_000_000.0)
    }
}

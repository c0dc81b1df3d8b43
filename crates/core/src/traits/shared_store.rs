use async_trait::async_trait;

use crate::RiberryResult;

/// 共享资源存储（SRS）抽象接口
///
/// 所有多键操作都必须是原子的，实现方可以依赖服务端脚本或内部互斥。
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> RiberryResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> RiberryResult<()>;

    /// 写入带毫秒级过期时间的键
    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> RiberryResult<()>;

    async fn exists(&self, key: &str) -> RiberryResult<bool>;

    async fn delete(&self, keys: &[String]) -> RiberryResult<()>;

    /// 当前值等于 `expected`（`None` 表示键不存在）时写入 `value`
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> RiberryResult<bool>;

    /// 键不存在时以 `token` 占有，带过期时间
    async fn try_lock(&self, key: &str, token: &str, ttl_ms: u64) -> RiberryResult<bool>;

    /// 仅当持有者为 `token` 时释放
    async fn unlock(&self, key: &str, token: &str) -> RiberryResult<bool>;

    async fn zadd(&self, key: &str, members: &[(String, f64)]) -> RiberryResult<()>;

    async fn zscore(&self, key: &str, member: &str) -> RiberryResult<Option<f64>>;

    /// 分数在 `[min, max]` 内的成员，按分数升序
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> RiberryResult<Vec<String>>;

    /// 所有成员按分数降序，同分按成员名降序
    async fn zrevrange_with_scores(&self, key: &str) -> RiberryResult<Vec<(String, f64)>>;

    /// 取 `src` 中排名最高的成员，`src` 中减一、`dst` 中加一，返回成员及其在 `src` 中的新分数
    async fn zmove_top(&self, src: &str, dst: &str) -> RiberryResult<Option<(String, f64)>>;

    /// `src` 中指定成员减一、`dst` 中加一
    async fn zmove(&self, src: &str, dst: &str, member: &str) -> RiberryResult<()>;

    async fn sadd(&self, key: &str, member: &str) -> RiberryResult<()>;

    async fn srem(&self, key: &str, member: &str) -> RiberryResult<()>;

    async fn sismember(&self, key: &str, member: &str) -> RiberryResult<bool>;

    async fn smembers(&self, key: &str) -> RiberryResult<Vec<String>>;

    /// 用给定成员整体替换集合
    async fn replace_set(&self, key: &str, members: &[String]) -> RiberryResult<()>;

    /// 存储端的当前时间（Unix 秒）
    async fn time(&self) -> RiberryResult<f64>;
}

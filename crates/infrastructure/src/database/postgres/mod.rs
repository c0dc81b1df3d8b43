pub mod postgres_artifact_repository;
pub mod postgres_event_repository;
pub mod postgres_execution_repository;
pub mod postgres_instance_repository;
pub mod postgres_job_repository;

pub use postgres_artifact_repository::*;
pub use postgres_event_repository::*;
pub use postgres_execution_repository::*;
pub use postgres_instance_repository::*;
pub use postgres_job_repository::*;

use std::sync::Arc;
use std::time::Duration;

use riberry_core::{config::DatabaseConfig, RiberryResult};
use riberry_domain::Repositories;
use sqlx::{PgPool, Pool, Postgres};
use tracing::info;

const SCHEMA: &str = include_str!("../../../migrations/001_riberry_schema.sql");

/// 数据库连接池管理器
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    /// 创建新的数据库管理器
    pub async fn new(config: &DatabaseConfig) -> RiberryResult<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 获取数据库连接池
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 创建表结构，重复执行是安全的
    pub async fn migrate(&self) -> RiberryResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("数据库表结构已就绪");
        Ok(())
    }

    /// 检查数据库连接健康状态
    pub async fn health_check(&self) -> RiberryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// 关闭数据库连接池
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// 基于同一连接池构建全部仓储
    pub fn repositories(&self) -> Repositories {
        let pool = self.pool.clone();
        Repositories {
            instances: Arc::new(PostgresInstanceRepository::new(pool.clone())),
            schedules: Arc::new(PostgresScheduleRepository::new(pool.clone())),
            jobs: Arc::new(PostgresJobRepository::new(pool.clone())),
            executions: Arc::new(PostgresExecutionRepository::new(pool.clone())),
            streams: Arc::new(PostgresStreamRepository::new(pool.clone())),
            artifacts: Arc::new(PostgresArtifactRepository::new(pool.clone())),
            external_tasks: Arc::new(PostgresExternalTaskRepository::new(pool.clone())),
            capacities: Arc::new(PostgresCapacityRepository::new(pool.clone())),
            events: Arc::new(PostgresEventRepository::new(pool.clone())),
            resource_data: Arc::new(PostgresResourceDataRepository::new(pool.clone())),
            notifications: Arc::new(PostgresNotificationRepository::new(pool)),
        }
    }
}

/// 数据库连接池类型别名
pub type DbPool = Pool<Postgres>;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryDatabase;
pub use postgres::{DatabaseManager, DbPool};

use std::sync::Arc;

use riberry_core::{config::DatabaseConfig, RiberryResult};
use riberry_domain::Repositories;
use tracing::info;

/// 已连接的持久化后端
pub enum Database {
    Postgres(DatabaseManager),
    Memory(Arc<InMemoryDatabase>),
}

impl Database {
    /// 按URL选择后端，PostgreSQL 连接后会确保表结构存在
    pub async fn connect(config: &DatabaseConfig) -> RiberryResult<Self> {
        if config.is_memory() {
            info!("使用进程内数据库");
            return Ok(Database::Memory(Arc::new(InMemoryDatabase::new())));
        }

        let manager = DatabaseManager::new(config).await?;
        manager.migrate().await?;
        Ok(Database::Postgres(manager))
    }

    pub fn repositories(&self) -> Repositories {
        match self {
            Database::Postgres(manager) => manager.repositories(),
            Database::Memory(db) => db.repositories(),
        }
    }

    pub async fn health_check(&self) -> RiberryResult<()> {
        match self {
            Database::Postgres(manager) => manager.health_check().await,
            Database::Memory(_) => Ok(()),
        }
    }

    pub async fn close(&self) {
        if let Database::Postgres(manager) = self {
            manager.close().await;
        }
    }
}

use std::sync::Arc;

use riberry_core::{AppConfig, MessageQueue, RiberryResult, SharedStore};
use riberry_domain::Repositories;
use tracing::info;

use crate::database::{Database, InMemoryDatabase};
use crate::shared_store::{create_shared_store, InMemorySharedStore};
use crate::{InMemoryMessageQueue, MessageQueueFactory};

/// 一个进程所需的全部外部依赖
#[derive(Clone)]
pub struct Infrastructure {
    pub database: Arc<Database>,
    pub repositories: Repositories,
    pub store: Arc<dyn SharedStore>,
    pub transport: Arc<dyn MessageQueue>,
}

impl Infrastructure {
    pub async fn connect(config: &AppConfig) -> RiberryResult<Self> {
        let database = Arc::new(Database::connect(&config.database).await?);
        let store = create_shared_store(&config.redis).await?;
        let transport = MessageQueueFactory::create(&config.transport, &config.redis).await?;

        info!("基础设施初始化完成");
        Ok(Self {
            repositories: database.repositories(),
            database,
            store,
            transport,
        })
    }

    /// 全部使用进程内实现
    pub fn in_memory() -> Self {
        let db = Arc::new(InMemoryDatabase::new());
        Self {
            repositories: db.repositories(),
            database: Arc::new(Database::Memory(db)),
            store: Arc::new(InMemorySharedStore::new()),
            transport: Arc::new(InMemoryMessageQueue::new()),
        }
    }

    pub async fn close(&self) {
        self.database.close().await;
    }
}

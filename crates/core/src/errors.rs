use thiserror::Error;

/// 控制平面错误类型定义
#[derive(Debug, Error)]
pub enum RiberryError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("共享存储错误: {0}")]
    SharedStore(#[from] redis::RedisError),

    #[error("共享存储操作错误: {0}")]
    StoreOperation(String),

    #[error("消息传输错误: {0}")]
    Transport(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("作业执行未找到: {id}")]
    ExecutionNotFound { id: i64 },

    #[error("根任务对应的作业执行未找到: {root_id}")]
    RootNotFound { root_id: String },

    #[error("应用实例未找到: {name}")]
    InstanceNotFound { name: String },

    #[error("执行流未找到: {task_id}")]
    StreamNotFound { task_id: String },

    #[error("外部任务未找到: {external_task_id}")]
    ExternalTaskNotFound { external_task_id: String },

    #[error("无效的状态转换: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("锁已被占用: {0}")]
    LockContention(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("任务未注册: {0}")]
    TaskNotRegistered(String),

    #[error("作业执行已结束: {root_id}")]
    ExecutionComplete { root_id: String },

    #[error("内部错误: {0}")]
    Internal(String),
}

impl RiberryError {
    /// 是否为“所属对象不存在”一类的错误
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RiberryError::ExecutionNotFound { .. }
                | RiberryError::RootNotFound { .. }
                | RiberryError::InstanceNotFound { .. }
                | RiberryError::StreamNotFound { .. }
                | RiberryError::ExternalTaskNotFound { .. }
        )
    }
}

/// 统一的Result类型
pub type RiberryResult<T> = std::result::Result<T, RiberryError>;

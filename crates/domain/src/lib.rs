//! Riberry 领域模型
//!
//! 实体、值对象、仓储抽象以及不依赖具体存储的领域服务。

pub mod entities;
pub mod events;
pub mod repositories;
pub mod services;
pub mod sqlx_impls;
pub mod value_objects;

pub use entities::*;
pub use events::{
    notify_types, ArtifactEventData, CustomEmail, NotifyEventData, StepEventData,
    StreamEventData,
};
pub use repositories::*;
pub use services::*;
pub use value_objects::*;

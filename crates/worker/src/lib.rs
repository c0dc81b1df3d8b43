//! 工作进程
//!
//! 消费任务队列，在执行流生命周期内运行应用任务，并托管后台控制循环、伸缩控制器和
//! 外部任务接收循环。

pub mod app;
pub mod builtin;
pub mod capacity;
pub mod context;
pub mod emitter;
pub mod events;
pub mod executor;
pub mod external;
pub mod flow;
pub mod pool;
pub mod scale;
pub mod shared_data;
pub mod task;
pub mod worker;

pub use app::{AppFactory, AppRegistry, EntryPoint, RiberryApp};
pub use capacity::{CapacityAddon, CapacityLease, CapacityStep, CAPACITY_LOCK};
pub use context::{TaskContext, WorkerServices};
pub use emitter::{StreamEventEmitter, TaskState};
pub use events::{
    handler_fn, EventHandler, EventKind, EventRegistry, HandlerOutcome, RegistryEvent,
};
pub use executor::{ExecutorSettings, TaskExecutor, TaskOutcome};
pub use external::{ExternalTaskReceiver, ExternalTasks, NewExternalTask};
pub use pool::{ConsumerControl, WorkerPool};
pub use scale::{compute_target, group_share, ScaleController};
pub use shared_data::{DataRefresher, SharedExecutionData};
pub use task::{
    task_fn, Fallback, RetryLimit, TaskError, TaskHandler, TaskOptions, TaskRegistry, TaskResult,
};
pub use worker::{Worker, WorkerBuilder};

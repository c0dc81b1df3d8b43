//! 后台控制循环
//!
//! 每个循环体都在自己的分布式锁槽位下运行，集群内同一时刻最多一个副本执行。

pub mod background;
pub mod capacity_distributor;
pub mod dispatcher;
pub mod heartbeat;
pub mod ingestor;
pub mod instance;
pub mod launcher;
pub mod loop_runner;
pub mod tracker;

pub use background::{BackgroundHook, BackgroundTasks, BACKGROUND_LOCK};
pub use capacity_distributor::{CapacityDistributor, CAPACITY_DISTRIBUTOR_LOCK};
pub use dispatcher::ExecutionDispatcher;
pub use heartbeat::Heartbeat;
pub use ingestor::{EventIngestor, EVENTS_LOCK};
pub use instance::InstanceSnapshot;
pub use launcher::{ExecutionLauncher, TransportLauncher};
pub use loop_runner::{LoopRunner, PeriodicStep};
pub use tracker::{ExecutionTracker, StaleExecutionWatchdog};

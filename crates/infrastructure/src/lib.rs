pub mod bootstrap;
pub mod database;
pub mod distributed_lock;
pub mod in_memory_queue;
pub mod message_queue;
pub mod message_queue_factory;
pub mod observability;
pub mod priority_queue;
pub mod shared_store;

pub use bootstrap::Infrastructure;
pub use database::{Database, DatabaseManager, InMemoryDatabase};
pub use distributed_lock::{throttle_timeout_ms, DistributedLock, DEFAULT_LOCK_HOLD};
pub use in_memory_queue::{InMemoryMessageQueue, InMemoryQueueConfig};
pub use message_queue::RedisMessageQueue;
pub use message_queue_factory::MessageQueueFactory;
pub use observability::{describe_metrics, init_metrics};
pub use priority_queue::{PqLease, PriorityQueue};
pub use shared_store::{create_shared_store, InMemorySharedStore, RedisSharedStore};

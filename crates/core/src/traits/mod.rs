pub mod message_queue;
pub mod shared_store;

pub use message_queue::MessageQueue;
pub use shared_store::SharedStore;

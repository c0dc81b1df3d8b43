pub mod message;

pub use message::{TaskMessage, TaskProperties, MAX_PRIORITY};

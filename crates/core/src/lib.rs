pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod routing;
pub mod traits;

pub use config::*;
pub use errors::{RiberryError, RiberryResult};
pub use logging::init_logging;
pub use models::{TaskMessage, TaskProperties};
pub use routing::{TaskRouter, CHECK_EXTERNAL_TASK, ENTRY_POINT_TASK, EXECUTION_COMPLETE_TASK};
pub use traits::{MessageQueue, SharedStore};

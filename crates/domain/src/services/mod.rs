pub mod capacity;
pub mod email;
pub mod lifecycle;
pub mod schedule;

pub use capacity::{allocate, parse_producer_value, CapacityAllocation, CapacityConsumer};
pub use email::{EmailMessage, EmailSender, LoggingEmailSender};
pub use lifecycle::{CompletionHook, ErrorReport, EventOrigin, ExecutionLifecycle, NewArtifact};
pub use schedule::{parse_timezone, ScheduleEvaluator, ScheduleTimezone, ACTIVE_PARAMETER};

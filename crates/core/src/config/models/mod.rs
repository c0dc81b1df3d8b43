pub mod app_config;
pub mod background;
pub mod database;
pub mod observability;
pub mod transport;
pub mod worker;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use background::{BackgroundConfig, CapacityConfig, EmailConfig};
pub use database::DatabaseConfig;
pub use observability::ObservabilityConfig;
pub use transport::{RedisConfig, TransportConfig};
pub use worker::{ScaleConfig, WorkerConfig};

pub mod app_config;
pub mod database;
pub mod email;
pub mod message_queue;
pub mod observability;
pub mod scheduler_worker;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use email::{EmailBackend, EmailConfig};
pub use message_queue::MessageQueueConfig;
pub use observability::ObservabilityConfig;
pub use scheduler_worker::{SchedulerConfig, WorkerConfig};

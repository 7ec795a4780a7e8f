pub mod audit_log_repository;
pub mod scheduled_task_repository;
pub mod task_execution_repository;

pub use audit_log_repository::*;
pub use scheduled_task_repository::*;
pub use task_execution_repository::*;

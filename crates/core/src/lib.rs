pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod executor_registry;
pub mod logging;
pub mod models;
pub mod retry;
pub mod task_lifecycle;
pub mod traits;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats,
    CircuitState,
};
pub use config::AppConfig;
pub use errors::*;
pub use executor_registry::{ExecutorInfo, TaskExecutorRegistry};
pub use logging::{init_logging, LogFormat};
pub use retry::{retry_async, retry_async_with, retry_sync, BackoffStrategy, RetryPolicy};
pub use task_lifecycle::{panic_message, run_with_lifecycle, TaskRunReport};

/// 统一的Result类型
pub type TaskbusResult<T> = std::result::Result<T, TaskbusError>;

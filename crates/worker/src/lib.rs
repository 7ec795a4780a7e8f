//! 消息消费Worker
//!
//! 按队列装配消费者和处理器，提供内置任务执行器，并由 [`WorkerHost`] 统一启停。

pub mod consumers;
pub mod executors;
pub mod handlers;
pub mod host;
pub mod messages;

pub use consumers::{ConsumerKind, WorkerDependencies};
pub use executors::builtin_registry;
pub use host::WorkerHost;
pub use messages::{EmailJob, EventJob};

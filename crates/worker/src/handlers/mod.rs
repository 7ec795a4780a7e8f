//! 各队列的消息处理器
//!
//! 每个处理器只负责把一种消息映射为一种副作用。系统提供至少一次投递，
//! 重复消息会再次产生副作用（例如重发邮件）。

pub mod audit;
pub mod email;
pub mod event;
pub mod file;
pub mod task;

pub use audit::AuditLogHandler;
pub use email::EmailHandler;
pub use event::{EventHandler, USER_LOGIN_ACTION};
pub use file::{
    extract_metadata, FileMetadata, FileProcessingHandler, FileProcessor, LoggingFileProcessor,
};
pub use task::ScheduledTaskHandler;

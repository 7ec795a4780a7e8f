pub mod broker;
pub mod email;
pub mod message_handler;
pub mod repository;
pub mod task_executor;

pub use broker::*;
pub use email::*;
pub use message_handler::*;
pub use repository::*;
pub use task_executor::*;

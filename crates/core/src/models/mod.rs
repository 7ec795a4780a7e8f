//! # 数据模型
//!
//! 消息信封与各类消息、定时任务定义、任务执行记录以及审计日志行。
//!
//! ## 状态管理
//!
//! ### 任务执行状态流转
//! ```text
//! Pending → Running → Success
//!    ↓         ↓
//! Cancelled  Failed / Cancelled
//! ```
//!
//! 终态不可回退，重复投递的消息遇到终态执行记录时直接确认。

pub mod audit;
pub mod message;
pub mod task;
pub mod task_execution;

pub use audit::*;
pub use message::*;
pub use task::*;
pub use task_execution::*;

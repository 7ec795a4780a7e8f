//! 定时任务调度
//!
//! 轮询到期任务，为每次分发创建执行记录并发布 `ScheduledTaskMessage`。

pub mod cron_utils;
pub mod scheduler;

pub use cron_utils::CronScheduler;
pub use scheduler::{DispatchSummary, TaskScheduler};

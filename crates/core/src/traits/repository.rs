//! 数据仓储层接口定义
//!
//! - `ScheduledTaskRepository` - 定时任务定义与到期查询
//! - `TaskExecutionRepository` - 任务执行记录的生命周期
//! - `AuditLogRepository` - 审计日志写入与清理
//!
//! 实现方为PostgreSQL（infrastructure crate）和内存版本（testing-utils crate）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AuditLogEntry, ScheduledTask, TaskExecution};
use crate::Result;

/// 定时任务仓储
#[async_trait]
pub trait ScheduledTaskRepository: Send + Sync {
    async fn create(&self, task: &ScheduledTask) -> Result<ScheduledTask>;

    async fn get_by_id(&self, id: i64) -> Result<Option<ScheduledTask>>;

    async fn update(&self, task: &ScheduledTask) -> Result<()>;

    /// 查询 `is_active = true` 且 `next_run_at <= now` 的任务
    async fn get_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>>;

    /// 记录一次分发：推进 `next_run_at`，累加 `run_count`，更新 `last_run_at`
    async fn record_dispatch(
        &self,
        id: i64,
        dispatched_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

/// 任务执行记录仓储
#[async_trait]
pub trait TaskExecutionRepository: Send + Sync {
    async fn create(&self, execution: &TaskExecution) -> Result<TaskExecution>;

    async fn get_by_id(&self, id: i64) -> Result<Option<TaskExecution>>;

    async fn update(&self, execution: &TaskExecution) -> Result<()>;

    async fn list_by_task(&self, task_id: i64, limit: i64) -> Result<Vec<TaskExecution>>;

    /// 删除早于给定时间的终态执行记录，返回删除行数
    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64>;
}

/// 审计日志仓储
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn insert(&self, entry: &AuditLogEntry) -> Result<AuditLogEntry>;

    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64>;
}

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use taskbus_core::{
    traits::{AuditLogRepository, TaskContext, TaskExecutionRepository, TaskExecutor, TaskResult},
    Result, TaskbusError,
};
use tracing::info;

pub const CLEANUP_AUDIT_LOGS_TASK_TYPE: &str = "cleanup_audit_logs";
pub const CLEANUP_TASK_EXECUTIONS_TASK_TYPE: &str = "cleanup_task_executions";

/// 读取 `retention_days`，缺省时使用默认值
fn retention_days(ctx: &TaskContext, default_days: u64) -> Result<u64> {
    match ctx.context.get("retention_days") {
        None | Some(serde_json::Value::Null) => Ok(default_days),
        Some(value) => match value.as_u64() {
            Some(days) if days > 0 => Ok(days),
            _ => Err(TaskbusError::InvalidTaskParams(format!(
                "retention_days必须是正整数: {value}"
            ))),
        },
    }
}

fn cutoff(days: u64) -> Result<DateTime<Utc>> {
    i64::try_from(days)
        .ok()
        .and_then(Duration::try_days)
        .and_then(|retention| Utc::now().checked_sub_signed(retention))
        .ok_or_else(|| TaskbusError::InvalidTaskParams(format!("retention_days超出范围: {days}")))
}

/// 清理过期审计日志
pub struct CleanupAuditLogsExecutor {
    repository: Arc<dyn AuditLogRepository>,
}

impl CleanupAuditLogsExecutor {
    pub const DEFAULT_RETENTION_DAYS: u64 = 90;

    pub fn new(repository: Arc<dyn AuditLogRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl TaskExecutor for CleanupAuditLogsExecutor {
    fn task_type(&self) -> &str {
        CLEANUP_AUDIT_LOGS_TASK_TYPE
    }

    fn name(&self) -> &str {
        "清理审计日志"
    }

    fn description(&self) -> &str {
        "删除早于保留天数的审计日志"
    }

    fn default_cron(&self) -> Option<&str> {
        Some("0 3 * * *")
    }

    fn validate_context(&self, ctx: &TaskContext) -> Result<()> {
        cutoff(retention_days(ctx, Self::DEFAULT_RETENTION_DAYS)?).map(|_| ())
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<TaskResult> {
        let days = retention_days(ctx, Self::DEFAULT_RETENTION_DAYS)?;
        let before = cutoff(days)?;
        let deleted = self.repository.delete_older_than(before).await?;

        info!("清理了 {} 条 {} 天前的审计日志", deleted, days);
        Ok(TaskResult::success(format!("清理了 {deleted} 条审计日志")).with_data(json!({
            "deleted": deleted,
            "retention_days": days,
            "before": before,
        })))
    }
}

/// 清理过期的终态执行记录
pub struct CleanupTaskExecutionsExecutor {
    repository: Arc<dyn TaskExecutionRepository>,
}

impl CleanupTaskExecutionsExecutor {
    pub const DEFAULT_RETENTION_DAYS: u64 = 30;

    pub fn new(repository: Arc<dyn TaskExecutionRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl TaskExecutor for CleanupTaskExecutionsExecutor {
    fn task_type(&self) -> &str {
        CLEANUP_TASK_EXECUTIONS_TASK_TYPE
    }

    fn name(&self) -> &str {
        "清理执行记录"
    }

    fn description(&self) -> &str {
        "删除早于保留天数且已结束的任务执行记录"
    }

    fn default_cron(&self) -> Option<&str> {
        Some("30 3 * * *")
    }

    fn validate_context(&self, ctx: &TaskContext) -> Result<()> {
        cutoff(retention_days(ctx, Self::DEFAULT_RETENTION_DAYS)?).map(|_| ())
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<TaskResult> {
        let days = retention_days(ctx, Self::DEFAULT_RETENTION_DAYS)?;
        let before = cutoff(days)?;
        let deleted = self.repository.delete_older_than(before).await?;

        info!("清理了 {} 条 {} 天前的执行记录", deleted, days);
        Ok(TaskResult::success(format!("清理了 {deleted} 条执行记录")).with_data(json!({
            "deleted": deleted,
            "retention_days": days,
            "before": before,
        })))
    }
}

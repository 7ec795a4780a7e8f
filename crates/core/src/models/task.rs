use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, TaskbusError};

/// 定时任务定义
///
/// 调度方式二选一：`cron_expression` 表示周期任务，`scheduled_at` 表示一次性任务。
/// 调度器每次分发后会推进 `next_run_at`、`run_count` 和 `last_run_at`。
///
/// # 使用示例
///
/// ```rust
/// use taskbus_core::models::ScheduledTask;
/// use serde_json::json;
///
/// let task = ScheduledTask::cron("nightly-cleanup", "cleanup_audit_logs", "0 3 * * *")
///     .with_context(json!({"retention_days": 30}));
/// assert!(task.validate_schedule().is_ok());
/// assert!(!task.is_one_shot());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub name: String,
    /// 执行器注册表中的任务类型
    pub task_type: String,
    pub cron_expression: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// IANA时区名，CRON表达式在该时区内求值
    pub timezone: String,
    pub is_active: bool,
    pub context: serde_json::Value,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_TIMEZONE: &str = "UTC";

impl ScheduledTask {
    fn base(name: impl Into<String>, task_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            task_type: task_type.into(),
            cron_expression: None,
            scheduled_at: None,
            timezone: DEFAULT_TIMEZONE.to_string(),
            is_active: true,
            context: serde_json::Value::Object(Default::default()),
            last_run_at: None,
            next_run_at: None,
            run_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// 周期任务
    pub fn cron(
        name: impl Into<String>,
        task_type: impl Into<String>,
        cron_expression: impl Into<String>,
    ) -> Self {
        let mut task = Self::base(name, task_type);
        task.cron_expression = Some(cron_expression.into());
        task
    }

    /// 一次性任务，首次运行时间即 `scheduled_at`
    pub fn one_shot(
        name: impl Into<String>,
        task_type: impl Into<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        let mut task = Self::base(name, task_type);
        task.scheduled_at = Some(scheduled_at);
        task.next_run_at = Some(scheduled_at);
        task
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn is_one_shot(&self) -> bool {
        self.cron_expression.is_none() && self.scheduled_at.is_some()
    }

    /// 校验调度配置：`cron_expression` 与 `scheduled_at` 必须且只能设置一个
    pub fn validate_schedule(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TaskbusError::InvalidSchedule("任务名称不能为空".to_string()));
        }
        if self.task_type.trim().is_empty() {
            return Err(TaskbusError::InvalidSchedule(format!(
                "任务 {} 缺少任务类型",
                self.name
            )));
        }
        match (&self.cron_expression, &self.scheduled_at) {
            (Some(expr), None) if expr.trim().is_empty() => Err(TaskbusError::InvalidSchedule(
                format!("任务 {} 的CRON表达式为空", self.name),
            )),
            (Some(_), None) | (None, Some(_)) => Ok(()),
            (Some(_), Some(_)) => Err(TaskbusError::InvalidSchedule(format!(
                "任务 {} 同时设置了cron_expression和scheduled_at",
                self.name
            ))),
            (None, None) => Err(TaskbusError::InvalidSchedule(format!(
                "任务 {} 未设置cron_expression或scheduled_at",
                self.name
            ))),
        }
    }

    /// 是否已到期
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_run_at.is_some_and(|next| next <= now)
    }

    /// 记录一次分发
    pub fn record_dispatch(&mut self, now: DateTime<Utc>, next_run_at: Option<DateTime<Utc>>) {
        self.last_run_at = Some(now);
        self.next_run_at = next_run_at;
        self.run_count += 1;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_exactly_one_schedule_field() {
        let now = Utc::now();
        assert!(ScheduledTask::cron("a", "http_request", "*/5 * * * *")
            .validate_schedule()
            .is_ok());
        assert!(ScheduledTask::one_shot("b", "http_request", now)
            .validate_schedule()
            .is_ok());

        let mut both = ScheduledTask::cron("c", "http_request", "0 * * * *");
        both.scheduled_at = Some(now);
        assert!(matches!(
            both.validate_schedule(),
            Err(TaskbusError::InvalidSchedule(_))
        ));

        let mut neither = ScheduledTask::cron("d", "http_request", "0 * * * *");
        neither.cron_expression = None;
        assert!(neither.validate_schedule().is_err());

        assert!(ScheduledTask::cron("e", "http_request", "  ")
            .validate_schedule()
            .is_err());
    }

    #[test]
    fn test_due_requires_active() {
        let now = Utc::now();
        let mut task = ScheduledTask::one_shot("once", "http_request", now - Duration::minutes(1));
        assert!(task.is_due(now));

        task.is_active = false;
        assert!(!task.is_due(now));
    }

    #[test]
    fn test_record_dispatch_advances_counters() {
        let now = Utc::now();
        let mut task = ScheduledTask::one_shot("once", "http_request", now);
        task.record_dispatch(now, None);

        assert_eq!(task.run_count, 1);
        assert_eq!(task.last_run_at, Some(now));
        assert!(task.next_run_at.is_none());
        assert!(!task.is_due(now + Duration::hours(1)));
    }
}

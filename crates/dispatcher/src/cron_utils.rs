use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;

use taskbus_core::{Result, TaskbusError};

/// CRON表达式解析和调度工具
///
/// 接受5段Unix表达式（自动补秒字段为0）以及6/7段表达式，
/// 按任务所在时区计算触发时间，结果统一转换为UTC。
#[derive(Debug, Clone)]
pub struct CronScheduler {
    schedule: Schedule,
    timezone: Tz,
}

impl CronScheduler {
    /// 创建UTC时区的CRON调度器
    pub fn new(cron_expr: &str) -> Result<Self> {
        Self::with_timezone(cron_expr, "UTC")
    }

    /// 创建指定IANA时区的CRON调度器
    pub fn with_timezone(cron_expr: &str, timezone: &str) -> Result<Self> {
        let normalized = Self::normalize_expression(cron_expr);
        let schedule = Schedule::from_str(&normalized).map_err(|e| TaskbusError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            schedule,
            timezone: parse_timezone(timezone)?,
        })
    }

    /// 5段表达式补齐秒字段
    pub fn normalize_expression(cron_expr: &str) -> String {
        let trimmed = cron_expr.trim();
        if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_string()
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// 获取 `from` 之后的下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&from.with_timezone(&self.timezone))
            .next()
            .map(|next| next.with_timezone(&Utc))
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(&from.with_timezone(&self.timezone))
            .take(count)
            .map(|next| next.with_timezone(&Utc))
            .collect()
    }

    /// 计算下次执行时间距离现在的时长
    pub fn time_until_next_execution(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_execution_time(now).map(|next| next - now)
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> Result<()> {
        Self::new(cron_expr).map(|_| ())
    }
}

/// 解析IANA时区名称
pub fn parse_timezone(timezone: &str) -> Result<Tz> {
    timezone
        .parse::<Tz>()
        .map_err(|_| TaskbusError::InvalidSchedule(format!("未知的时区: {timezone}")))
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, TaskbusError};

/// 执行来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Scheduler,
    Manual,
    Api,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggeredBy::Scheduler => "scheduler",
            TriggeredBy::Manual => "manual",
            TriggeredBy::Api => "api",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "scheduler" => Ok(TriggeredBy::Scheduler),
            "manual" => Ok(TriggeredBy::Manual),
            "api" => Ok(TriggeredBy::Api),
            other => Err(TaskbusError::Internal(format!("无效的触发来源: {other}"))),
        }
    }
}

impl fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 执行状态，只能单向推进
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(TaskbusError::Internal(format!("无效的执行状态: {other}"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Cancelled) | (Running, Success) | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务执行记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: i64,
    pub task_id: i64,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub triggered_by: TriggeredBy,
    pub created_at: DateTime<Utc>,
}

impl TaskExecution {
    /// 新建待执行记录，id由存储层生成
    pub fn pending(task_id: i64, triggered_by: TriggeredBy) -> Self {
        Self {
            id: 0,
            task_id,
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            result: None,
            error: None,
            retry_count: 0,
            triggered_by,
            created_at: Utc::now(),
        }
    }

    fn transition(&mut self, next: ExecutionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(TaskbusError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_running(&mut self, started_at: DateTime<Utc>) -> Result<()> {
        self.transition(ExecutionStatus::Running)?;
        self.started_at = Some(started_at);
        Ok(())
    }

    pub fn mark_success(
        &mut self,
        completed_at: DateTime<Utc>,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        self.transition(ExecutionStatus::Success)?;
        self.finish(completed_at);
        self.result = result;
        self.error = None;
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        completed_at: DateTime<Utc>,
        error: impl Into<String>,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        self.transition(ExecutionStatus::Failed)?;
        self.finish(completed_at);
        self.error = Some(error.into());
        self.result = result;
        Ok(())
    }

    pub fn mark_cancelled(&mut self, completed_at: DateTime<Utc>) -> Result<()> {
        self.transition(ExecutionStatus::Cancelled)?;
        self.finish(completed_at);
        Ok(())
    }

    fn finish(&mut self, completed_at: DateTime<Utc>) {
        self.completed_at = Some(completed_at);
        self.duration_ms = self
            .started_at
            .map(|started| (completed_at - started).num_milliseconds().max(0));
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

//! 任务执行器接口定义
//!
//! 执行器按 `task_type` 注册到 [`crate::executor_registry::TaskExecutorRegistry`]，
//! 由任务消费者通过 [`crate::task_lifecycle::run_with_lifecycle`] 调用，
//! 生命周期包装负责参数校验、计时、钩子以及把错误和panic转换为失败结果。
//!
//! ## 实现自定义执行器
//!
//! ```rust
//! use async_trait::async_trait;
//! use taskbus_core::traits::{TaskContext, TaskExecutor, TaskResult};
//! use taskbus_core::TaskbusResult;
//!
//! pub struct EchoExecutor;
//!
//! #[async_trait]
//! impl TaskExecutor for EchoExecutor {
//!     fn task_type(&self) -> &str {
//!         "echo"
//!     }
//!
//!     fn name(&self) -> &str {
//!         "回显"
//!     }
//!
//!     async fn execute(&self, ctx: &TaskContext) -> TaskbusResult<TaskResult> {
//!         Ok(TaskResult::success("ok").with_data(ctx.context.clone()))
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::TriggeredBy;
use crate::{Result, TaskbusError};

/// 任务执行上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub task_id: i64,
    pub execution_id: i64,
    pub task_name: String,
    pub task_type: String,
    /// 任务定义中的自由参数
    pub context: serde_json::Value,
    pub triggered_by: TriggeredBy,
}

impl TaskContext {
    /// 读取必填的字符串参数
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.context
            .get(key)
            .and_then(|value| value.as_str())
            .ok_or_else(|| TaskbusError::InvalidTaskParams(format!("缺少参数 {key}")))
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.context.get(key).and_then(|value| value.as_u64())
    }
}

/// 执行器返回的业务结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl TaskResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// 任务执行器
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// 注册表中的唯一键
    fn task_type(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// 建议的默认CRON表达式
    fn default_cron(&self) -> Option<&str> {
        None
    }

    /// 执行前的参数校验，失败时不会调用 `execute`
    fn validate_context(&self, _ctx: &TaskContext) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<TaskResult>;

    async fn on_success(&self, _ctx: &TaskContext, _result: &TaskResult) {}

    async fn on_failure(&self, _ctx: &TaskContext, _result: &TaskResult) {}
}

use std::panic::AssertUnwindSafe;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::traits::{TaskContext, TaskExecutor, TaskResult};

/// 一次执行的完整报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRunReport {
    pub result: TaskResult,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl TaskRunReport {
    pub fn is_success(&self) -> bool {
        self.result.success
    }
}

/// 带生命周期地运行执行器
///
/// 先校验参数，校验失败直接返回失败结果；随后执行并计时，
/// 执行器返回的错误或发生的panic都会转换成失败结果，不会向外传播。
/// 最后按结果调用 `on_success` 或 `on_failure`。
pub async fn run_with_lifecycle(executor: &dyn TaskExecutor, ctx: &TaskContext) -> TaskRunReport {
    let started_at = Utc::now();

    let result = match executor.validate_context(ctx) {
        Err(e) => {
            warn!(
                "任务 {} (执行 {}) 参数校验失败: {}",
                ctx.task_name, ctx.execution_id, e
            );
            TaskResult::failure(format!("参数校验失败: {e}"))
        }
        Ok(()) => {
            debug!(
                "开始执行任务 {} 类型 {} (执行 {})",
                ctx.task_name, ctx.task_type, ctx.execution_id
            );
            match AssertUnwindSafe(executor.execute(ctx)).catch_unwind().await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => TaskResult::failure(e.to_string()),
                Err(panic) => {
                    TaskResult::failure(format!("执行器发生panic: {}", panic_message(&*panic)))
                }
            }
        }
    };

    let completed_at = Utc::now();
    let duration_ms = (completed_at - started_at).num_milliseconds().max(0);

    if result.success {
        executor.on_success(ctx, &result).await;
    } else {
        executor.on_failure(ctx, &result).await;
    }

    TaskRunReport {
        result,
        started_at,
        completed_at,
        duration_ms,
    }
}

/// 从panic负载中提取可读信息
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use taskbus_core::{
    models::{BrokerMessage, ExecutionStatus, ScheduledTaskMessage, TaskExecution},
    run_with_lifecycle,
    traits::{MessageHandler, TaskContext, TaskExecutionRepository},
    Result, TaskExecutorRegistry, TaskbusError,
};
use tracing::{error, info, instrument, warn};

/// 定时任务执行处理器
///
/// 执行器的业务失败记录在执行记录上并确认消息；
/// 只有存储层错误会向外传播，触发消息重试。
pub struct ScheduledTaskHandler {
    executions: Arc<dyn TaskExecutionRepository>,
    registry: Arc<TaskExecutorRegistry>,
}

impl ScheduledTaskHandler {
    pub fn new(
        executions: Arc<dyn TaskExecutionRepository>,
        registry: Arc<TaskExecutorRegistry>,
    ) -> Self {
        Self {
            executions,
            registry,
        }
    }

    async fn load_execution(&self, message: &ScheduledTaskMessage) -> Result<TaskExecution> {
        self.executions
            .get_by_id(message.execution_id)
            .await?
            .ok_or(TaskbusError::TaskExecutionNotFound {
                id: message.execution_id,
            })
    }

    async fn fail_execution(&self, mut execution: TaskExecution, reason: String) -> Result<()> {
        error!("执行记录 {} 失败: {}", execution.id, reason);
        execution.mark_failed(Utc::now(), reason, None)?;
        self.executions.update(&execution).await
    }
}

#[async_trait]
impl MessageHandler<ScheduledTaskMessage> for ScheduledTaskHandler {
    #[instrument(skip_all, fields(
        task_id = message.task_id,
        execution_id = message.execution_id,
        task_type = %message.task_type,
    ))]
    async fn handle(&self, message: ScheduledTaskMessage) -> Result<()> {
        let mut execution = self.load_execution(&message).await?;

        if execution.is_terminal() {
            info!(
                "执行记录 {} 已处于终态 {}，忽略重复投递 {}",
                execution.id,
                execution.status,
                message.id()
            );
            return Ok(());
        }

        let message_retries = i32::try_from(message.envelope().retry_count()).unwrap_or(i32::MAX);
        execution.retry_count = execution.retry_count.max(message_retries);

        match execution.status {
            ExecutionStatus::Pending => execution.mark_running(Utc::now())?,
            _ => warn!("执行记录 {} 在运行中被重新投递，重新执行", execution.id),
        }
        self.executions.update(&execution).await?;

        let Some(executor) = self.registry.get(&message.task_type) else {
            let reason = format!("未找到任务类型 {} 的执行器", message.task_type);
            return self.fail_execution(execution, reason).await;
        };

        let ctx = TaskContext {
            task_id: message.task_id,
            execution_id: execution.id,
            task_name: message.task_name.clone(),
            task_type: message.task_type.clone(),
            context: message.context.clone(),
            triggered_by: message.triggered_by,
        };

        let report = run_with_lifecycle(executor.as_ref(), &ctx).await;
        let output = serde_json::to_value(&report.result)
            .map_err(|e| TaskbusError::Serialization(format!("任务结果: {e}")))?;

        if report.is_success() {
            execution.mark_success(report.completed_at, Some(output))?;
            info!(
                "任务 {} 执行成功，耗时 {}ms: {}",
                message.task_name, report.duration_ms, report.result.message
            );
        } else {
            let reason = report.result.message.clone();
            execution.mark_failed(report.completed_at, reason, Some(output))?;
            warn!(
                "任务 {} 执行失败，耗时 {}ms: {}",
                message.task_name, report.duration_ms, report.result.message
            );
        }

        self.executions.update(&execution).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskbus_core::{
        models::TriggeredBy,
        traits::{TaskExecutor, TaskResult},
    };
    use taskbus_testing_utils::MockTaskExecutionRepository;

    struct EchoExecutor;

    #[async_trait]
    impl TaskExecutor for EchoExecutor {
        fn task_type(&self) -> &str {
            "echo"
        }

        fn name(&self) -> &str {
            "回显"
        }

        async fn execute(&self, ctx: &TaskContext) -> Result<TaskResult> {
            match ctx.context.get("fail").and_then(|v| v.as_bool()) {
                Some(true) => Err(TaskbusError::TaskExecution("按要求失败".to_string())),
                _ => Ok(TaskResult::success("ok").with_data(ctx.context.clone())),
            }
        }
    }

    fn setup() -> (MockTaskExecutionRepository, ScheduledTaskHandler) {
        let executions = MockTaskExecutionRepository::new();
        let mut registry = TaskExecutorRegistry::new();
        registry.register(Arc::new(EchoExecutor)).unwrap();
        let handler = ScheduledTaskHandler::new(Arc::new(executions.clone()), Arc::new(registry));
        (executions, handler)
    }

    fn message_for(
        execution: &TaskExecution,
        task_type: &str,
        context: serde_json::Value,
    ) -> ScheduledTaskMessage {
        ScheduledTaskMessage::new(
            execution.task_id,
            "demo",
            task_type,
            execution.id,
            context,
            execution.triggered_by,
        )
    }

    #[tokio::test]
    async fn test_successful_execution_is_persisted() {
        let (executions, handler) = setup();
        let execution = executions.insert(TaskExecution::pending(1, TriggeredBy::Scheduler));

        handler
            .handle(message_for(&execution, "echo", json!({"k": "v"})))
            .await
            .unwrap();

        let stored = executions.get(execution.id).unwrap();
        assert_eq!(stored.status, ExecutionStatus::Success);
        assert!(stored.started_at.is_some());
        assert!(stored.duration_ms.is_some());
        assert_eq!(stored.result.as_ref().unwrap()["data"]["k"], "v");
        assert!(stored.error.is_none());
    }

    #[tokio::test]
    async fn test_executor_error_marks_failed_without_retry() {
        let (executions, handler) = setup();
        let execution = executions.insert(TaskExecution::pending(1, TriggeredBy::Manual));

        let result = handler
            .handle(message_for(&execution, "echo", json!({"fail": true})))
            .await;
        assert!(result.is_ok());

        let stored = executions.get(execution.id).unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert!(stored.error.as_deref().unwrap().contains("按要求失败"));
    }

    #[tokio::test]
    async fn test_unknown_task_type_fails_execution() {
        let (executions, handler) = setup();
        let execution = executions.insert(TaskExecution::pending(1, TriggeredBy::Scheduler));

        handler
            .handle(message_for(&execution, "missing", json!({})))
            .await
            .unwrap();

        let stored = executions.get(execution.id).unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert!(stored.error.as_deref().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_terminal_execution_is_not_rerun() {
        let (executions, handler) = setup();
        let mut execution = TaskExecution::pending(1, TriggeredBy::Scheduler);
        execution.mark_cancelled(Utc::now()).unwrap();
        let execution = executions.insert(execution);

        handler
            .handle(message_for(&execution, "echo", json!({})))
            .await
            .unwrap();

        assert_eq!(
            executions.get(execution.id).unwrap().status,
            ExecutionStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_retry_count_follows_message() {
        let (executions, handler) = setup();
        let execution = executions.insert(TaskExecution::pending(1, TriggeredBy::Scheduler));
        let mut message = message_for(&execution, "echo", json!({}));
        message.envelope_mut().increment_retry();
        message.envelope_mut().increment_retry();

        handler.handle(message).await.unwrap();

        assert_eq!(executions.get(execution.id).unwrap().retry_count, 2);
    }

    #[tokio::test]
    async fn test_missing_execution_is_retryable_error() {
        let (_executions, handler) = setup();
        let message =
            ScheduledTaskMessage::new(1, "demo", "echo", 404, json!({}), TriggeredBy::Api);

        assert!(matches!(
            handler.handle(message).await,
            Err(TaskbusError::TaskExecutionNotFound { id: 404 })
        ));
    }
}

//! 内置任务执行器

pub mod cleanup;
pub mod http;

use std::sync::Arc;

use taskbus_core::{
    traits::{AuditLogRepository, TaskExecutionRepository},
    Result, TaskExecutorRegistry,
};

pub use cleanup::{
    CleanupAuditLogsExecutor, CleanupTaskExecutionsExecutor, CLEANUP_AUDIT_LOGS_TASK_TYPE,
    CLEANUP_TASK_EXECUTIONS_TASK_TYPE,
};
pub use http::{HttpRequestExecutor, HttpTaskParams, HTTP_REQUEST_TASK_TYPE};

/// 构建包含全部内置执行器的注册表
pub fn builtin_registry(
    audit_logs: Arc<dyn AuditLogRepository>,
    executions: Arc<dyn TaskExecutionRepository>,
) -> Result<TaskExecutorRegistry> {
    let mut registry = TaskExecutorRegistry::new();
    registry.register(Arc::new(HttpRequestExecutor::new()))?;
    registry.register(Arc::new(CleanupAuditLogsExecutor::new(audit_logs)))?;
    registry.register(Arc::new(CleanupTaskExecutionsExecutor::new(executions)))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskbus_testing_utils::{MockAuditLogRepository, MockTaskExecutionRepository};

    #[test]
    fn test_builtin_registry_contents() {
        let registry = builtin_registry(
            Arc::new(MockAuditLogRepository::new()),
            Arc::new(MockTaskExecutionRepository::new()),
        )
        .unwrap();

        assert_eq!(
            registry.list_types(),
            vec![
                CLEANUP_AUDIT_LOGS_TASK_TYPE.to_string(),
                CLEANUP_TASK_EXECUTIONS_TASK_TYPE.to_string(),
                HTTP_REQUEST_TASK_TYPE.to_string(),
            ]
        );
        let info = registry.get_info();
        assert!(info
            .iter()
            .any(|i| i.task_type == CLEANUP_AUDIT_LOGS_TASK_TYPE
                && i.default_cron.as_deref() == Some("0 3 * * *")));
    }
}

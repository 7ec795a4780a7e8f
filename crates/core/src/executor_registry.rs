use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::traits::TaskExecutor;
use crate::{Result, TaskbusError};

/// 执行器注册表
///
/// 进程启动时构建并注册全部执行器，随后以 `Arc` 共享给任务消费者，不再修改。
#[derive(Default)]
pub struct TaskExecutorRegistry {
    executors: BTreeMap<String, Arc<dyn TaskExecutor>>,
}

impl TaskExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册执行器；任务类型为空、带首尾空白或已存在时返回错误，不会覆盖
    pub fn register(&mut self, executor: Arc<dyn TaskExecutor>) -> Result<()> {
        let task_type = executor.task_type().to_string();
        if task_type.trim().is_empty() {
            return Err(TaskbusError::InvalidExecutor(format!(
                "执行器 {} 的任务类型为空",
                executor.name()
            )));
        }
        // 键与查找时使用的原始任务类型必须一致
        if task_type.trim() != task_type {
            return Err(TaskbusError::InvalidExecutor(format!(
                "执行器 {} 的任务类型 {:?} 含首尾空白",
                executor.name(),
                task_type
            )));
        }
        if self.executors.contains_key(&task_type) {
            return Err(TaskbusError::DuplicateExecutor(task_type));
        }

        info!("注册任务执行器: {} ({})", task_type, executor.name());
        self.executors.insert(task_type, executor);
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.executors.contains_key(task_type)
    }

    pub fn get_all(&self) -> Vec<Arc<dyn TaskExecutor>> {
        self.executors.values().cloned().collect()
    }

    pub fn list_types(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }

    pub fn get_info(&self) -> Vec<ExecutorInfo> {
        self.executors
            .values()
            .map(|executor| ExecutorInfo {
                task_type: executor.task_type().to_string(),
                name: executor.name().to_string(),
                description: executor.description().to_string(),
                default_cron: executor.default_cron().map(str::to_string),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

/// 执行器描述信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub task_type: String,
    pub name: String,
    pub description: String,
    pub default_cron: Option<String>,
}

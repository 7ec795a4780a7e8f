use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskbus_core::{
    models::{AuditLogEntry, ScheduledTask, TaskExecution},
    traits::{
        AuditLogRepository, EmailSender, ScheduledTaskRepository, TaskExecutionRepository,
    },
    Result, TaskbusError,
};

/// Mock scheduled task repository for testing
#[derive(Debug, Clone)]
pub struct MockScheduledTaskRepository {
    tasks: Arc<Mutex<HashMap<i64, ScheduledTask>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockScheduledTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn with_tasks(tasks: Vec<ScheduledTask>) -> Self {
        let repo = Self::new();
        for task in tasks {
            repo.insert(task);
        }
        repo
    }

    /// 直接写入任务，id为0时分配新id
    pub fn insert(&self, mut task: ScheduledTask) -> ScheduledTask {
        let mut next_id = self.next_id.lock().unwrap();
        if task.id == 0 {
            task.id = *next_id;
        }
        *next_id = (*next_id).max(task.id + 1);
        self.tasks.lock().unwrap().insert(task.id, task.clone());
        task
    }

    pub fn get(&self, id: i64) -> Option<ScheduledTask> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }

    pub fn clear(&self) {
        self.tasks.lock().unwrap().clear();
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

impl Default for MockScheduledTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScheduledTaskRepository for MockScheduledTaskRepository {
    async fn create(&self, task: &ScheduledTask) -> Result<ScheduledTask> {
        task.validate_schedule()?;
        let mut task = task.clone();
        task.id = 0;
        Ok(self.insert(task))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<ScheduledTask>> {
        Ok(self.get(id))
    }

    async fn update(&self, task: &ScheduledTask) -> Result<()> {
        task.validate_schedule()?;
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&task.id) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(TaskbusError::TaskNotFound { id: task.id }),
        }
    }

    async fn get_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let tasks = self.tasks.lock().unwrap();
        let mut due: Vec<ScheduledTask> = tasks
            .values()
            .filter(|task| task.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|task| (task.next_run_at, task.id));
        Ok(due)
    }

    async fn record_dispatch(
        &self,
        id: i64,
        dispatched_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&id)
            .ok_or(TaskbusError::TaskNotFound { id })?;
        task.record_dispatch(dispatched_at, next_run_at);
        Ok(())
    }
}

/// Mock task execution repository for testing
///
/// `fail_create_for` 让指定任务的执行记录创建失败，用于验证故障隔离。
#[derive(Debug, Clone)]
pub struct MockTaskExecutionRepository {
    executions: Arc<Mutex<HashMap<i64, TaskExecution>>>,
    next_id: Arc<Mutex<i64>>,
    failing_tasks: Arc<Mutex<HashSet<i64>>>,
}

impl MockTaskExecutionRepository {
    pub fn new() -> Self {
        Self {
            executions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            failing_tasks: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn fail_create_for(&self, task_id: i64) {
        self.failing_tasks.lock().unwrap().insert(task_id);
    }

    /// 直接写入执行记录，id为0时分配新id
    pub fn insert(&self, mut execution: TaskExecution) -> TaskExecution {
        let mut next_id = self.next_id.lock().unwrap();
        if execution.id == 0 {
            execution.id = *next_id;
        }
        *next_id = (*next_id).max(execution.id + 1);
        self.executions
            .lock()
            .unwrap()
            .insert(execution.id, execution.clone());
        execution
    }

    pub fn get(&self, id: i64) -> Option<TaskExecution> {
        self.executions.lock().unwrap().get(&id).cloned()
    }

    /// 按id升序返回全部执行记录
    pub fn all(&self) -> Vec<TaskExecution> {
        let mut executions: Vec<TaskExecution> =
            self.executions.lock().unwrap().values().cloned().collect();
        executions.sort_by_key(|execution| execution.id);
        executions
    }

    pub fn count(&self) -> usize {
        self.executions.lock().unwrap().len()
    }
}

impl Default for MockTaskExecutionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutionRepository for MockTaskExecutionRepository {
    async fn create(&self, execution: &TaskExecution) -> Result<TaskExecution> {
        if self.failing_tasks.lock().unwrap().contains(&execution.task_id) {
            return Err(TaskbusError::DatabaseOperation(format!(
                "模拟写入失败: 任务 {}",
                execution.task_id
            )));
        }
        let mut execution = execution.clone();
        execution.id = 0;
        Ok(self.insert(execution))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<TaskExecution>> {
        Ok(self.get(id))
    }

    async fn update(&self, execution: &TaskExecution) -> Result<()> {
        let mut executions = self.executions.lock().unwrap();
        match executions.get_mut(&execution.id) {
            Some(existing) => {
                *existing = execution.clone();
                Ok(())
            }
            None => Err(TaskbusError::TaskExecutionNotFound { id: execution.id }),
        }
    }

    async fn list_by_task(&self, task_id: i64, limit: i64) -> Result<Vec<TaskExecution>> {
        let mut executions: Vec<TaskExecution> = self
            .executions
            .lock()
            .unwrap()
            .values()
            .filter(|execution| execution.task_id == task_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        executions.truncate(limit.max(0) as usize);
        Ok(executions)
    }

    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut executions = self.executions.lock().unwrap();
        let initial = executions.len();
        executions.retain(|_, execution| !(execution.created_at < before && execution.is_terminal()));
        Ok((initial - executions.len()) as u64)
    }
}

/// Mock audit log repository for testing
#[derive(Debug, Clone)]
pub struct MockAuditLogRepository {
    entries: Arc<Mutex<Vec<AuditLogEntry>>>,
    next_id: Arc<Mutex<i64>>,
    fail_inserts: Arc<Mutex<bool>>,
}

impl MockAuditLogRepository {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(1)),
            fail_inserts: Arc::new(Mutex::new(false)),
        }
    }

    pub fn set_fail_inserts(&self, fail: bool) {
        *self.fail_inserts.lock().unwrap() = fail;
    }

    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl Default for MockAuditLogRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditLogRepository for MockAuditLogRepository {
    async fn insert(&self, entry: &AuditLogEntry) -> Result<AuditLogEntry> {
        if *self.fail_inserts.lock().unwrap() {
            return Err(TaskbusError::DatabaseOperation(
                "模拟写入失败: audit_logs".to_string(),
            ));
        }
        let mut next_id = self.next_id.lock().unwrap();
        let mut entry = entry.clone();
        entry.id = *next_id;
        *next_id += 1;
        self.entries.lock().unwrap().push(entry.clone());
        Ok(entry)
    }

    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut entries = self.entries.lock().unwrap();
        let initial = entries.len();
        entries.retain(|entry| entry.created_at >= before);
        Ok((initial - entries.len()) as u64)
    }
}

/// 被记录下来的邮件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
}

/// 只记录不发送的邮件发送器
///
/// `failing(n)` 让前 n 次发送返回错误，之后恢复正常。
#[derive(Debug, Clone, Default)]
pub struct RecordingEmailSender {
    sent: Arc<Mutex<Vec<SentEmail>>>,
    remaining_failures: Arc<Mutex<usize>>,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(times: usize) -> Self {
        let sender = Self::default();
        *sender.remaining_failures.lock().unwrap() = times;
        sender
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
        text_body: Option<&str>,
    ) -> Result<()> {
        {
            let mut remaining = self.remaining_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TaskbusError::Email(format!("模拟发送失败: {to}")));
            }
        }

        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
            text_body: text_body.map(str::to_string),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::ScheduledTaskBuilder;
    use chrono::Duration;
    use taskbus_core::models::TriggeredBy;

    #[tokio::test]
    async fn test_due_tasks_filtered_and_ordered() {
        let now = Utc::now();
        let repo = MockScheduledTaskRepository::with_tasks(vec![
            ScheduledTaskBuilder::new()
                .with_name("later")
                .with_next_run(now - Duration::minutes(1))
                .build(),
            ScheduledTaskBuilder::new()
                .with_name("earlier")
                .with_next_run(now - Duration::minutes(5))
                .build(),
            ScheduledTaskBuilder::new()
                .with_name("inactive")
                .with_next_run(now - Duration::minutes(5))
                .inactive()
                .build(),
            ScheduledTaskBuilder::new()
                .with_name("future")
                .with_next_run(now + Duration::minutes(5))
                .build(),
        ]);

        let names: Vec<String> = repo
            .get_due_tasks(now)
            .await
            .unwrap()
            .into_iter()
            .map(|task| task.name)
            .collect();
        assert_eq!(names, vec!["earlier", "later"]);
    }

    #[tokio::test]
    async fn test_execution_update_requires_existing_row() {
        let repo = MockTaskExecutionRepository::new();
        let missing = TaskExecution::pending(1, TriggeredBy::Manual);
        assert!(matches!(
            repo.update(&TaskExecution { id: 42, ..missing }).await,
            Err(TaskbusError::TaskExecutionNotFound { id: 42 })
        ));

        repo.fail_create_for(7);
        assert!(repo
            .create(&TaskExecution::pending(7, TriggeredBy::Scheduler))
            .await
            .is_err());
        assert_eq!(repo.count(), 0);
    }

    #[tokio::test]
    async fn test_recording_sender_fails_then_recovers() {
        let sender = RecordingEmailSender::failing(1);
        assert!(sender.send("a@b.com", "s", "<p>x</p>", None).await.is_err());
        assert!(sender.send("a@b.com", "s", "<p>x</p>", None).await.is_ok());
        assert_eq!(sender.count(), 1);
    }
}

use chrono::{DateTime, Utc};
use taskbus_core::models::ScheduledTask;

/// Builder for creating test scheduled tasks
///
/// 默认是每小时运行一次、已经到期的 `http_request` 周期任务。
pub struct ScheduledTaskBuilder {
    task: ScheduledTask,
}

impl ScheduledTaskBuilder {
    pub fn new() -> Self {
        let mut task = ScheduledTask::cron("test_task", "http_request", "0 * * * *");
        task.next_run_at = Some(Utc::now());
        Self { task }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn with_task_type(mut self, task_type: &str) -> Self {
        self.task.task_type = task_type.to_string();
        self
    }

    /// 设置CRON表达式并清除一次性时间
    pub fn with_cron(mut self, expr: &str) -> Self {
        self.task.cron_expression = Some(expr.to_string());
        self.task.scheduled_at = None;
        self
    }

    /// 改为一次性任务，`next_run_at` 同步为 `at`
    pub fn one_shot_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.cron_expression = None;
        self.task.scheduled_at = Some(at);
        self.task.next_run_at = Some(at);
        self
    }

    pub fn with_timezone(mut self, timezone: &str) -> Self {
        self.task.timezone = timezone.to_string();
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.task.context = context;
        self
    }

    pub fn with_next_run(mut self, next_run_at: DateTime<Utc>) -> Self {
        self.task.next_run_at = Some(next_run_at);
        self
    }

    pub fn without_next_run(mut self) -> Self {
        self.task.next_run_at = None;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.task.is_active = false;
        self
    }

    pub fn build(self) -> ScheduledTask {
        self.task
    }
}

impl Default for ScheduledTaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use taskbus_core::{
    config::SchedulerConfig,
    models::{ScheduledTask, TaskExecution, TriggeredBy},
    traits::{ScheduledTaskRepository, TaskExecutionRepository},
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, Result, TaskbusError,
};
use taskbus_infrastructure::MessageProducer;

use crate::cron_utils::CronScheduler;

/// 保护任务分发发布的熔断器名称
pub const DISPATCH_BREAKER: &str = "scheduler.dispatch";

/// 一轮轮询的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub dispatched: usize,
    pub failed: usize,
    /// 调度配置无效而被跳过的任务
    pub skipped: usize,
}

/// 定时任务调度器
pub struct TaskScheduler {
    task_repo: Arc<dyn ScheduledTaskRepository>,
    execution_repo: Arc<dyn TaskExecutionRepository>,
    producer: MessageProducer,
    config: SchedulerConfig,
    breaker: Arc<CircuitBreaker>,
}

impl TaskScheduler {
    pub async fn new(
        task_repo: Arc<dyn ScheduledTaskRepository>,
        execution_repo: Arc<dyn TaskExecutionRepository>,
        producer: MessageProducer,
        config: SchedulerConfig,
        breakers: &CircuitBreakerRegistry,
    ) -> Self {
        let breaker = breakers
            .get_or_create(DISPATCH_BREAKER, CircuitBreakerConfig::default())
            .await;
        Self {
            task_repo,
            execution_repo,
            producer,
            config,
            breaker,
        }
    }

    /// 轮询循环，直到 `cancel` 被触发
    ///
    /// 单轮失败只记录日志，下一个间隔继续。
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "调度器已启动，检查间隔 {}s",
            self.config.check_interval_seconds
        );

        let mut ticker = tokio::time::interval(self.config.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("调度器收到停止信号");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.check_and_dispatch_tasks(Utc::now()).await {
                        error!("检查到期任务失败: {}", e);
                    }
                }
            }
        }

        info!("调度器已停止");
    }

    /// 查询并分发到期任务，单个任务失败不影响其他任务
    #[instrument(skip(self))]
    pub async fn check_and_dispatch_tasks(&self, now: DateTime<Utc>) -> Result<DispatchSummary> {
        let due_tasks = self.task_repo.get_due_tasks(now).await?;
        let mut summary = DispatchSummary::default();

        if due_tasks.is_empty() {
            debug!("没有到期任务");
            return Ok(summary);
        }

        info!("发现 {} 个到期任务", due_tasks.len());

        for task in due_tasks {
            // 存储层已过滤，这里再确认一次
            if !task.is_due(now) {
                continue;
            }

            if let Err(e) = task.validate_schedule() {
                error!(
                    "任务 {} (ID: {}) 调度配置无效，跳过: {}",
                    task.name, task.id, e
                );
                summary.skipped += 1;
                continue;
            }

            match self.dispatch_task(&task, now).await {
                Ok(execution) => {
                    info!(
                        "任务 {} (ID: {}) 已分发，执行记录 {}",
                        task.name, task.id, execution.id
                    );
                    summary.dispatched += 1;
                }
                Err(e) => {
                    error!("分发任务 {} (ID: {}) 失败: {}", task.name, task.id, e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "本轮调度完成: 分发 {}, 失败 {}, 跳过 {}",
            summary.dispatched, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    /// 分发一个到期任务并推进其调度时间
    pub async fn dispatch_task(
        &self,
        task: &ScheduledTask,
        now: DateTime<Utc>,
    ) -> Result<TaskExecution> {
        // 先计算下一次运行时间，无效的CRON表达式不会产生执行记录
        let next_run_at = self.next_run_after(task, now)?;

        let execution = self.publish_execution(task, TriggeredBy::Scheduler).await?;

        self.task_repo
            .record_dispatch(task.id, now, next_run_at)
            .await?;

        match next_run_at {
            Some(next) => debug!("任务 {} 下次运行时间: {}", task.name, next),
            None => debug!("一次性任务 {} 已分发，不再调度", task.name),
        }

        Ok(execution)
    }

    /// 手动或API触发，不改变任务的调度时间
    pub async fn trigger_task(
        &self,
        task_id: i64,
        triggered_by: TriggeredBy,
    ) -> Result<TaskExecution> {
        let task = self
            .task_repo
            .get_by_id(task_id)
            .await?
            .ok_or(TaskbusError::TaskNotFound { id: task_id })?;

        info!(
            "手动触发任务 {} (ID: {}, 来源: {})",
            task.name, task.id, triggered_by
        );
        self.publish_execution(&task, triggered_by).await
    }

    /// 为新任务计算首次运行时间
    pub fn initialize_next_run(&self, task: &mut ScheduledTask, now: DateTime<Utc>) -> Result<()> {
        task.validate_schedule()?;
        task.next_run_at = match (&task.cron_expression, task.scheduled_at) {
            (Some(expr), _) => CronScheduler::with_timezone(expr, &task.timezone)?
                .next_execution_time(now),
            (None, scheduled_at) => scheduled_at,
        };
        Ok(())
    }

    fn next_run_after(
        &self,
        task: &ScheduledTask,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        match &task.cron_expression {
            Some(expr) => {
                let next =
                    CronScheduler::with_timezone(expr, &task.timezone)?.next_execution_time(now);
                if next.is_none() {
                    warn!("任务 {} 的CRON表达式没有后续触发时间", task.name);
                }
                Ok(next)
            }
            None => Ok(None),
        }
    }

    async fn publish_execution(
        &self,
        task: &ScheduledTask,
        triggered_by: TriggeredBy,
    ) -> Result<TaskExecution> {
        // 生产者关闭时发布是空操作，不能创建无人消费的执行记录
        if !self.producer.is_enabled() {
            return Err(TaskbusError::Configuration(format!(
                "消息队列已禁用，无法分发任务 {}",
                task.name
            )));
        }

        let execution = self
            .execution_repo
            .create(&TaskExecution::pending(task.id, triggered_by))
            .await?;

        let published = self
            .breaker
            .execute(|| {
                self.producer.dispatch_scheduled_task(
                    task.id,
                    &task.name,
                    &task.task_type,
                    execution.id,
                    task.context.clone(),
                    triggered_by,
                )
            })
            .await;

        if let Err(e) = published {
            self.abandon_execution(execution, &e).await;
            return Err(e);
        }

        Ok(execution)
    }

    /// 发布失败时把执行记录标记为已取消，任务保持到期状态等待下一轮
    async fn abandon_execution(&self, mut execution: TaskExecution, cause: &TaskbusError) {
        if let Err(e) = execution.mark_cancelled(Utc::now()) {
            warn!("无法取消执行记录 {}: {}", execution.id, e);
            return;
        }
        execution.error = Some(format!("分发失败: {cause}"));
        if let Err(e) = self.execution_repo.update(&execution).await {
            error!("更新执行记录 {} 失败: {}", execution.id, e);
        }
    }
}

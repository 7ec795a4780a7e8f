use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use taskbus_core::{
    config::SchedulerConfig,
    models::{ExecutionStatus, ScheduledTaskMessage, TriggeredBy},
    traits::{MessageBroker, ScheduledTaskRepository},
    CircuitBreakerRegistry, CircuitState, TaskbusError,
};
use taskbus_dispatcher::{scheduler::DISPATCH_BREAKER, DispatchSummary, TaskScheduler};
use taskbus_infrastructure::{InMemoryBroker, MessageProducer};
use taskbus_testing_utils::{
    wait_for, MockScheduledTaskRepository, MockTaskExecutionRepository, ScheduledTaskBuilder,
};

const TASK_ROUTING_KEY: &str = "task.execute.http_request";

struct Harness {
    tasks: MockScheduledTaskRepository,
    executions: MockTaskExecutionRepository,
    broker: InMemoryBroker,
    breakers: CircuitBreakerRegistry,
    scheduler: TaskScheduler,
}

async fn harness(tasks: MockScheduledTaskRepository, config: SchedulerConfig) -> Harness {
    let executions = MockTaskExecutionRepository::new();
    let broker = InMemoryBroker::default();
    let breakers = CircuitBreakerRegistry::new();
    let producer = MessageProducer::new(Arc::new(broker.clone()), true);

    let scheduler = TaskScheduler::new(
        Arc::new(tasks.clone()),
        Arc::new(executions.clone()),
        producer,
        config,
        &breakers,
    )
    .await;

    Harness {
        tasks,
        executions,
        broker,
        breakers,
        scheduler,
    }
}

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap()
}

#[tokio::test]
async fn test_due_cron_task_dispatched_once() {
    let now = fixed_now();
    let tasks = MockScheduledTaskRepository::with_tasks(vec![ScheduledTaskBuilder::new()
        .with_id(1)
        .with_name("hourly_ping")
        .with_cron("0 * * * *")
        .with_context(json!({"url": "http://localhost/ping"}))
        .with_next_run(now - Duration::minutes(1))
        .build()]);
    let h = harness(tasks, SchedulerConfig::default()).await;

    let summary = h.scheduler.check_and_dispatch_tasks(now).await.unwrap();
    assert_eq!(
        summary,
        DispatchSummary {
            dispatched: 1,
            failed: 0,
            skipped: 0
        }
    );

    let executions = h.executions.all();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Pending);
    assert_eq!(executions[0].triggered_by, TriggeredBy::Scheduler);

    let messages: Vec<ScheduledTaskMessage> = h.broker.published_messages(TASK_ROUTING_KEY);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].task_id, 1);
    assert_eq!(messages[0].execution_id, executions[0].id);
    assert_eq!(messages[0].context["url"], "http://localhost/ping");

    let task = h.tasks.get(1).unwrap();
    assert_eq!(
        task.next_run_at,
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap())
    );
    assert_eq!(task.run_count, 1);
    assert_eq!(task.last_run_at, Some(now));

    // 同一时刻再次轮询不会重复分发
    let again = h.scheduler.check_and_dispatch_tasks(now).await.unwrap();
    assert_eq!(again.dispatched, 0);
    assert_eq!(h.executions.count(), 1);
}

#[tokio::test]
async fn test_inactive_task_is_ignored() {
    let now = fixed_now();
    let tasks = MockScheduledTaskRepository::with_tasks(vec![ScheduledTaskBuilder::new()
        .with_next_run(now - Duration::minutes(10))
        .inactive()
        .build()]);
    let h = harness(tasks, SchedulerConfig::default()).await;

    let summary = h.scheduler.check_and_dispatch_tasks(now).await.unwrap();
    assert_eq!(summary, DispatchSummary::default());
    assert_eq!(h.executions.count(), 0);
    assert!(h.broker.published(TASK_ROUTING_KEY).is_empty());
}

#[tokio::test]
async fn test_one_shot_task_runs_exactly_once() {
    let now = fixed_now();
    let tasks = MockScheduledTaskRepository::with_tasks(vec![ScheduledTaskBuilder::new()
        .with_id(7)
        .with_name("launch_report")
        .one_shot_at(now - Duration::seconds(5))
        .build()]);
    let h = harness(tasks, SchedulerConfig::default()).await;

    let first = h.scheduler.check_and_dispatch_tasks(now).await.unwrap();
    assert_eq!(first.dispatched, 1);

    let task = h.tasks.get(7).unwrap();
    assert!(task.next_run_at.is_none());
    assert_eq!(task.run_count, 1);

    let later = h
        .scheduler
        .check_and_dispatch_tasks(now + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(later.dispatched, 0);
    assert_eq!(h.executions.count(), 1);
}

#[tokio::test]
async fn test_one_bad_task_does_not_block_others() {
    let now = fixed_now();
    let due = now - Duration::minutes(1);

    let mut both_fields = ScheduledTaskBuilder::new()
        .with_id(1)
        .with_name("both_fields")
        .with_next_run(due)
        .build();
    both_fields.scheduled_at = Some(due);

    let tasks = MockScheduledTaskRepository::with_tasks(vec![
        both_fields,
        ScheduledTaskBuilder::new()
            .with_id(2)
            .with_name("bad_cron")
            .with_cron("not a cron")
            .with_next_run(due)
            .build(),
        ScheduledTaskBuilder::new()
            .with_id(3)
            .with_name("storage_fails")
            .with_next_run(due)
            .build(),
        ScheduledTaskBuilder::new()
            .with_id(4)
            .with_name("healthy")
            .with_next_run(due)
            .build(),
    ]);
    let h = harness(tasks, SchedulerConfig::default()).await;
    h.executions.fail_create_for(3);

    let summary = h.scheduler.check_and_dispatch_tasks(now).await.unwrap();
    assert_eq!(
        summary,
        DispatchSummary {
            dispatched: 1,
            failed: 2,
            skipped: 1
        }
    );

    let executions = h.executions.all();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].task_id, 4);

    // 失败的任务保持到期状态
    assert_eq!(h.tasks.get(2).unwrap().next_run_at, Some(due));
    assert_eq!(h.tasks.get(3).unwrap().run_count, 0);
    assert_eq!(h.tasks.get(4).unwrap().run_count, 1);
}

#[tokio::test]
async fn test_publish_failure_cancels_execution() {
    let now = fixed_now();
    let due = now - Duration::minutes(1);
    let tasks = MockScheduledTaskRepository::with_tasks(vec![ScheduledTaskBuilder::new()
        .with_id(1)
        .with_next_run(due)
        .build()]);
    let h = harness(tasks, SchedulerConfig::default()).await;
    h.broker.close().await.unwrap();

    let summary = h.scheduler.check_and_dispatch_tasks(now).await.unwrap();
    assert_eq!(summary.failed, 1);

    let execution = &h.executions.all()[0];
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert!(execution
        .error
        .as_deref()
        .is_some_and(|e| e.starts_with("分发失败")));

    let task = h.tasks.get(1).unwrap();
    assert_eq!(task.next_run_at, Some(due));
    assert_eq!(task.run_count, 0);
}

#[tokio::test]
async fn test_disabled_producer_keeps_one_shot_task_due() {
    let now = fixed_now();
    let due = now - Duration::seconds(5);
    let tasks = MockScheduledTaskRepository::with_tasks(vec![ScheduledTaskBuilder::new()
        .with_id(9)
        .with_name("one_off_export")
        .one_shot_at(due)
        .build()]);
    let executions = MockTaskExecutionRepository::new();
    let broker = InMemoryBroker::default();
    let breakers = CircuitBreakerRegistry::new();
    let scheduler = TaskScheduler::new(
        Arc::new(tasks.clone()),
        Arc::new(executions.clone()),
        MessageProducer::new(Arc::new(broker.clone()), false),
        SchedulerConfig::default(),
        &breakers,
    )
    .await;

    let summary = scheduler.check_and_dispatch_tasks(now).await.unwrap();
    assert_eq!(
        summary,
        DispatchSummary {
            dispatched: 0,
            failed: 1,
            skipped: 0
        }
    );
    assert_eq!(executions.count(), 0);
    assert!(broker.events().is_empty());

    let task = tasks.get(9).unwrap();
    assert_eq!(task.next_run_at, Some(due));
    assert_eq!(task.run_count, 0);

    assert!(matches!(
        scheduler.trigger_task(9, TriggeredBy::Manual).await,
        Err(TaskbusError::Configuration(_))
    ));
    assert_eq!(executions.count(), 0);

    let breaker = breakers.get(DISPATCH_BREAKER).await.unwrap();
    assert_eq!(breaker.state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_dispatch_breaker_opens_after_repeated_failures() {
    let now = fixed_now();
    let tasks = MockScheduledTaskRepository::with_tasks(vec![ScheduledTaskBuilder::new()
        .with_id(1)
        .with_next_run(now - Duration::minutes(1))
        .build()]);
    let h = harness(tasks, SchedulerConfig::default()).await;
    h.broker.close().await.unwrap();

    for _ in 0..5 {
        let summary = h.scheduler.check_and_dispatch_tasks(now).await.unwrap();
        assert_eq!(summary.failed, 1);
    }

    let breaker = h.breakers.get(DISPATCH_BREAKER).await.unwrap();
    assert_eq!(breaker.state().await, CircuitState::Open);

    let task = h.tasks.get(1).unwrap();
    let err = h.scheduler.dispatch_task(&task, now).await.unwrap_err();
    assert!(matches!(err, TaskbusError::CircuitOpen { .. }));
}

#[tokio::test]
async fn test_manual_trigger_keeps_schedule() {
    let now = Utc::now();
    let next = now + Duration::hours(2);
    let tasks = MockScheduledTaskRepository::with_tasks(vec![ScheduledTaskBuilder::new()
        .with_id(5)
        .with_next_run(next)
        .build()]);
    let h = harness(tasks, SchedulerConfig::default()).await;

    let execution = h
        .scheduler
        .trigger_task(5, TriggeredBy::Manual)
        .await
        .unwrap();
    assert_eq!(execution.triggered_by, TriggeredBy::Manual);
    assert_eq!(execution.status, ExecutionStatus::Pending);

    let messages: Vec<ScheduledTaskMessage> = h.broker.published_messages(TASK_ROUTING_KEY);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].triggered_by, TriggeredBy::Manual);

    let task = h.tasks.get(5).unwrap();
    assert_eq!(task.next_run_at, Some(next));
    assert_eq!(task.run_count, 0);

    let missing = h.scheduler.trigger_task(999, TriggeredBy::Api).await;
    assert!(matches!(missing, Err(TaskbusError::TaskNotFound { id: 999 })));
}

#[tokio::test]
async fn test_initialize_next_run() {
    let h = harness(MockScheduledTaskRepository::new(), SchedulerConfig::default()).await;
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    let mut cron_task = ScheduledTaskBuilder::new()
        .with_cron("0 9 * * *")
        .with_timezone("Asia/Shanghai")
        .without_next_run()
        .build();
    h.scheduler
        .initialize_next_run(&mut cron_task, now)
        .unwrap();
    assert_eq!(
        cron_task.next_run_at,
        Some(Utc.with_ymd_and_hms(2024, 6, 1, 1, 0, 0).unwrap())
    );

    let at = now + Duration::days(3);
    let mut one_shot = ScheduledTaskBuilder::new()
        .one_shot_at(at)
        .without_next_run()
        .build();
    h.scheduler.initialize_next_run(&mut one_shot, now).unwrap();
    assert_eq!(one_shot.next_run_at, Some(at));

    let mut bad_tz = ScheduledTaskBuilder::new()
        .with_timezone("Mars/Olympus")
        .build();
    assert!(matches!(
        h.scheduler.initialize_next_run(&mut bad_tz, now),
        Err(TaskbusError::InvalidSchedule(_))
    ));
}

#[tokio::test]
async fn test_run_loop_dispatches_and_stops_on_cancel() {
    let tasks = MockScheduledTaskRepository::with_tasks(vec![ScheduledTaskBuilder::new()
        .with_id(1)
        .with_next_run(Utc::now() - Duration::minutes(1))
        .build()]);
    let h = harness(
        tasks,
        SchedulerConfig {
            enabled: true,
            check_interval_seconds: 1,
        },
    )
    .await;

    let Harness {
        tasks,
        executions,
        scheduler,
        ..
    } = h;
    let scheduler = Arc::new(scheduler);
    let cancel = CancellationToken::new();

    let handle = {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    let dispatched = wait_for(
        || {
            let executions = executions.clone();
            async move { executions.count() == 1 }
        },
        StdDuration::from_secs(2),
    )
    .await;
    assert!(dispatched);
    assert_eq!(tasks.get(1).unwrap().run_count, 1);

    cancel.cancel();
    let stopped = tokio::time::timeout(StdDuration::from_secs(2), handle).await;
    assert!(stopped.is_ok());
}

#[tokio::test]
async fn test_repository_rejects_invalid_schedule_on_create() {
    let repo = MockScheduledTaskRepository::new();
    let mut task = ScheduledTaskBuilder::new().build();
    task.cron_expression = None;
    task.scheduled_at = None;

    assert!(matches!(
        repo.create(&task).await,
        Err(TaskbusError::InvalidSchedule(_))
    ));
}

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use taskbus_core::{
    config::{SchedulerConfig, WorkerConfig},
    models::{AuditLogEntry, AuditLogMessage, ExecutionStatus, TriggeredBy},
    traits::{AuditLogRepository, MessageBroker},
    CircuitBreakerRegistry,
};
use taskbus_dispatcher::TaskScheduler;
use taskbus_infrastructure::{ConsumerSettings, InMemoryBroker, MessageProducer};
use taskbus_testing_utils::{
    wait_for, MockAuditLogRepository, MockScheduledTaskRepository, MockTaskExecutionRepository,
    RecordingEmailSender, ScheduledTaskBuilder,
};
use taskbus_worker::{
    builtin_registry, executors::CLEANUP_AUDIT_LOGS_TASK_TYPE, handlers::LoggingFileProcessor,
    ConsumerKind, WorkerDependencies, WorkerHost,
};

struct Stack {
    broker: InMemoryBroker,
    tasks: MockScheduledTaskRepository,
    executions: MockTaskExecutionRepository,
    audit_logs: MockAuditLogRepository,
    scheduler: TaskScheduler,
    deps: WorkerDependencies,
}

async fn stack(tasks: MockScheduledTaskRepository) -> Stack {
    let broker = InMemoryBroker::default();
    let executions = MockTaskExecutionRepository::new();
    let audit_logs = MockAuditLogRepository::new();
    let breakers = CircuitBreakerRegistry::new();

    let scheduler = TaskScheduler::new(
        Arc::new(tasks.clone()),
        Arc::new(executions.clone()),
        MessageProducer::new(Arc::new(broker.clone()), true),
        SchedulerConfig::default(),
        &breakers,
    )
    .await;

    let registry =
        builtin_registry(Arc::new(audit_logs.clone()), Arc::new(executions.clone())).unwrap();

    let deps = WorkerDependencies {
        broker: Arc::new(broker.clone()),
        settings: ConsumerSettings {
            retry_delay_base: Duration::from_millis(5),
            retry_delay_max: Duration::from_millis(20),
        },
        config: WorkerConfig::default(),
        email_sender: Arc::new(RecordingEmailSender::new()),
        frontend_url: "https://app.example.com".to_string(),
        audit_logs: Arc::new(audit_logs.clone()),
        executions: Arc::new(executions.clone()),
        registry: Arc::new(registry),
        file_processor: Arc::new(LoggingFileProcessor),
    };

    // 消费者启动前就可能分发，先声明队列
    for kind in ConsumerKind::ALL {
        broker
            .declare_consumer_queue(&kind.spec(&deps.config))
            .await
            .unwrap();
    }

    Stack {
        broker,
        tasks,
        executions,
        audit_logs,
        scheduler,
        deps,
    }
}

type HostHandle = tokio::task::JoinHandle<taskbus_core::Result<()>>;

fn start_host(stack: &Stack, kinds: &[ConsumerKind]) -> (CancellationToken, HostHandle) {
    let host = WorkerHost::new(
        stack.deps.build_consumers(kinds),
        stack.deps.broker.clone(),
        Duration::from_secs(5),
    );
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(host.run(shutdown.clone()));
    (shutdown, handle)
}

#[tokio::test]
async fn test_scheduled_cleanup_runs_to_success() {
    let now = Utc::now();
    let tasks = MockScheduledTaskRepository::with_tasks(vec![ScheduledTaskBuilder::new()
        .with_id(1)
        .with_name("nightly_audit_cleanup")
        .with_task_type(CLEANUP_AUDIT_LOGS_TASK_TYPE)
        .with_cron("0 3 * * *")
        .with_context(json!({"retention_days": 30}))
        .with_next_run(now - ChronoDuration::minutes(1))
        .build()]);
    let stack = stack(tasks).await;

    let mut stale = AuditLogEntry::from(&AuditLogMessage::new("user.login", "user"));
    stale.created_at = now - ChronoDuration::days(45);
    stack.audit_logs.insert(&stale).await.unwrap();
    stack
        .audit_logs
        .insert(&AuditLogEntry::from(&AuditLogMessage::new("user.login", "user")))
        .await
        .unwrap();

    let (shutdown, handle) = start_host(&stack, &[ConsumerKind::Task]);

    let summary = stack.scheduler.check_and_dispatch_tasks(now).await.unwrap();
    assert_eq!(summary.dispatched, 1);

    let executions = &stack.executions;
    let finished = wait_for(
        move || async move {
            executions
                .all()
                .first()
                .map(|e| e.status == ExecutionStatus::Success)
                .unwrap_or(false)
        },
        Duration::from_secs(3),
    )
    .await;
    assert!(finished);

    let execution = stack.executions.all().remove(0);
    assert_eq!(execution.task_id, 1);
    assert_eq!(execution.triggered_by, TriggeredBy::Scheduler);
    assert!(execution.duration_ms.is_some());
    assert_eq!(execution.result.as_ref().unwrap()["data"]["deleted"], 1);
    assert_eq!(stack.audit_logs.count(), 1);

    let task = stack.tasks.get(1).unwrap();
    assert_eq!(task.run_count, 1);
    assert!(task.next_run_at.unwrap() > now);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unknown_task_type_ends_failed_and_acked() {
    let now = Utc::now();
    let tasks = MockScheduledTaskRepository::with_tasks(vec![ScheduledTaskBuilder::new()
        .with_id(7)
        .with_task_type("no_such_executor")
        .with_next_run(now - ChronoDuration::seconds(5))
        .build()]);
    let stack = stack(tasks).await;
    let (shutdown, handle) = start_host(&stack, &[ConsumerKind::Task]);

    stack.scheduler.check_and_dispatch_tasks(now).await.unwrap();

    let executions = &stack.executions;
    assert!(
        wait_for(
            move || async move {
                executions
                    .all()
                    .first()
                    .map(|e| e.status == ExecutionStatus::Failed)
                    .unwrap_or(false)
            },
            Duration::from_secs(3),
        )
        .await
    );
    let execution = stack.executions.all().remove(0);
    assert!(execution.error.unwrap().contains("no_such_executor"));
    assert!(stack.broker.dead_letters("task_queue").is_empty());

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_manual_trigger_and_login_audit_share_one_host() {
    let tasks = MockScheduledTaskRepository::with_tasks(vec![ScheduledTaskBuilder::new()
        .with_id(3)
        .with_task_type(CLEANUP_AUDIT_LOGS_TASK_TYPE)
        .without_next_run()
        .build()]);
    let stack = stack(tasks).await;
    let (shutdown, handle) = start_host(&stack, &[ConsumerKind::Task, ConsumerKind::Event]);

    let producer = MessageProducer::new(Arc::new(stack.broker.clone()), true);
    producer
        .publish_user_logged_in(42, Some("10.0.0.1"), Some("curl/8"))
        .await
        .unwrap();
    stack.scheduler.trigger_task(3, TriggeredBy::Manual).await.unwrap();

    let (executions, audit_logs) = (&stack.executions, &stack.audit_logs);
    assert!(
        wait_for(
            move || async move {
                audit_logs.count() == 1
                    && executions
                        .all()
                        .iter()
                        .any(|e| e.status == ExecutionStatus::Success)
            },
            Duration::from_secs(3),
        )
        .await
    );

    let entry = stack.audit_logs.entries().remove(0);
    assert_eq!(entry.user_id, Some(42));
    assert_eq!(entry.action, "user.login");
    assert_eq!(stack.executions.all()[0].triggered_by, TriggeredBy::Manual);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

//! 队列约定与消费者装配

use std::fmt;
use std::sync::Arc;

use taskbus_core::{
    config::WorkerConfig,
    models::{AuditLogMessage, BrokerMessage, FileProcessingMessage, ScheduledTaskMessage},
    traits::{
        AuditLogRepository, ConsumerSpec, EmailSender, MessageBroker, MessageHandler,
        TaskExecutionRepository,
    },
    TaskExecutorRegistry,
};
use taskbus_infrastructure::{ConsumerSettings, ManagedConsumer, MessageConsumer};

use crate::handlers::{
    AuditLogHandler, EmailHandler, EventHandler, FileProcessingHandler, FileProcessor,
    ScheduledTaskHandler,
};
use crate::messages::{EmailJob, EventJob};

pub const EMAIL_QUEUE: &str = "email_queue";
pub const EVENT_QUEUE: &str = "event_queue";
pub const FILE_QUEUE: &str = "file_queue";
pub const AUDIT_QUEUE: &str = "audit_queue";
pub const TASK_QUEUE: &str = "task_queue";

/// 消费者种类，每种对应一个队列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerKind {
    Email,
    Event,
    File,
    Audit,
    Task,
}

impl ConsumerKind {
    pub const ALL: [ConsumerKind; 5] = [
        ConsumerKind::Email,
        ConsumerKind::Event,
        ConsumerKind::File,
        ConsumerKind::Audit,
        ConsumerKind::Task,
    ];

    pub fn queue_name(&self) -> &'static str {
        match self {
            ConsumerKind::Email => EMAIL_QUEUE,
            ConsumerKind::Event => EVENT_QUEUE,
            ConsumerKind::File => FILE_QUEUE,
            ConsumerKind::Audit => AUDIT_QUEUE,
            ConsumerKind::Task => TASK_QUEUE,
        }
    }

    pub fn spec(&self, config: &WorkerConfig) -> ConsumerSpec {
        match self {
            ConsumerKind::Email => ConsumerSpec::new(
                EMAIL_QUEUE,
                &["email.*"],
                config.email_prefetch,
                EmailJob::KIND,
            ),
            ConsumerKind::Event => ConsumerSpec::new(
                EVENT_QUEUE,
                &["event.#"],
                config.event_prefetch,
                EventJob::KIND,
            ),
            ConsumerKind::File => ConsumerSpec::new(
                FILE_QUEUE,
                &["file.#"],
                config.file_prefetch,
                FileProcessingMessage::KIND,
            ),
            ConsumerKind::Audit => ConsumerSpec::new(
                AUDIT_QUEUE,
                &["audit.#"],
                config.audit_prefetch,
                AuditLogMessage::KIND,
            ),
            ConsumerKind::Task => ConsumerSpec::new(
                TASK_QUEUE,
                &["task.#"],
                config.task_prefetch,
                ScheduledTaskMessage::KIND,
            ),
        }
    }
}

impl fmt::Display for ConsumerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.queue_name())
    }
}

/// 装配消费者所需的共享依赖，进程启动时构建一次
#[derive(Clone)]
pub struct WorkerDependencies {
    pub broker: Arc<dyn MessageBroker>,
    pub settings: ConsumerSettings,
    pub config: WorkerConfig,
    pub email_sender: Arc<dyn EmailSender>,
    pub frontend_url: String,
    pub audit_logs: Arc<dyn AuditLogRepository>,
    pub executions: Arc<dyn TaskExecutionRepository>,
    pub registry: Arc<TaskExecutorRegistry>,
    pub file_processor: Arc<dyn FileProcessor>,
}

impl WorkerDependencies {
    fn consumer<M: BrokerMessage>(
        &self,
        kind: ConsumerKind,
        handler: Arc<dyn MessageHandler<M>>,
    ) -> Arc<dyn ManagedConsumer> {
        Arc::new(MessageConsumer::new(
            kind.spec(&self.config),
            handler,
            self.broker.clone(),
            self.settings.clone(),
        ))
    }

    /// 为指定种类构建消费者
    pub fn build_consumer(&self, kind: ConsumerKind) -> Arc<dyn ManagedConsumer> {
        match kind {
            ConsumerKind::Email => self.consumer::<EmailJob>(
                kind,
                Arc::new(EmailHandler::new(
                    self.email_sender.clone(),
                    self.frontend_url.clone(),
                )),
            ),
            ConsumerKind::Event => self.consumer::<EventJob>(
                kind,
                Arc::new(EventHandler::new(
                    self.email_sender.clone(),
                    self.audit_logs.clone(),
                )),
            ),
            ConsumerKind::File => self.consumer::<FileProcessingMessage>(
                kind,
                Arc::new(FileProcessingHandler::new(self.file_processor.clone())),
            ),
            ConsumerKind::Audit => self.consumer::<AuditLogMessage>(
                kind,
                Arc::new(AuditLogHandler::new(self.audit_logs.clone())),
            ),
            ConsumerKind::Task => self.consumer::<ScheduledTaskMessage>(
                kind,
                Arc::new(ScheduledTaskHandler::new(
                    self.executions.clone(),
                    self.registry.clone(),
                )),
            ),
        }
    }

    pub fn build_consumers(&self, kinds: &[ConsumerKind]) -> Vec<Arc<dyn ManagedConsumer>> {
        kinds.iter().map(|kind| self.build_consumer(*kind)).collect()
    }
}

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use taskbus_core::{config::AppConfig, traits::MessageBroker, CircuitBreakerRegistry};
use taskbus_dispatcher::TaskScheduler;
use taskbus_infrastructure::{
    build_email_sender, ConsumerSettings, DatabaseManager, MessageProducer, RabbitMqBroker,
};
use taskbus_worker::{
    builtin_registry, handlers::LoggingFileProcessor, ConsumerKind, WorkerDependencies,
    WorkerHost,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 进程运行模式，每种模式对应一个独立进程
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 定时任务调度器
    Scheduler,
    TaskWorker,
    EmailWorker,
    EventWorker,
    AuditWorker,
    FileWorker,
    /// 在同一进程中运行全部消费者
    AllWorkers,
}

impl AppMode {
    pub const NAMES: [&'static str; 7] = [
        "scheduler",
        "task-worker",
        "email-worker",
        "event-worker",
        "audit-worker",
        "file-worker",
        "all-workers",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppMode::Scheduler => "scheduler",
            AppMode::TaskWorker => "task-worker",
            AppMode::EmailWorker => "email-worker",
            AppMode::EventWorker => "event-worker",
            AppMode::AuditWorker => "audit-worker",
            AppMode::FileWorker => "file-worker",
            AppMode::AllWorkers => "all-workers",
        }
    }

    /// 该模式需要运行的消费者；调度器模式为空
    pub fn consumer_kinds(&self) -> Vec<ConsumerKind> {
        match self {
            AppMode::Scheduler => Vec::new(),
            AppMode::TaskWorker => vec![ConsumerKind::Task],
            AppMode::EmailWorker => vec![ConsumerKind::Email],
            AppMode::EventWorker => vec![ConsumerKind::Event],
            AppMode::AuditWorker => vec![ConsumerKind::Audit],
            AppMode::FileWorker => vec![ConsumerKind::File],
            AppMode::AllWorkers => ConsumerKind::ALL.to_vec(),
        }
    }
}

impl FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "scheduler" => Ok(AppMode::Scheduler),
            "task-worker" => Ok(AppMode::TaskWorker),
            "email-worker" => Ok(AppMode::EmailWorker),
            "event-worker" => Ok(AppMode::EventWorker),
            "audit-worker" => Ok(AppMode::AuditWorker),
            "file-worker" => Ok(AppMode::FileWorker),
            "all-workers" => Ok(AppMode::AllWorkers),
            other => Err(anyhow!("不支持的运行模式: {other}")),
        }
    }
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 检查运行模式与配置是否匹配
pub fn check_mode(mode: AppMode, config: &AppConfig) -> Result<()> {
    if mode == AppMode::Scheduler && !config.scheduler.enabled {
        return Err(anyhow!("调度器被禁用，请检查配置 scheduler.enabled"));
    }
    if !config.message_queue.enabled {
        return Err(match mode {
            AppMode::Scheduler => anyhow!("消息队列被禁用，调度器无法分发任务"),
            _ => anyhow!("消息队列被禁用，Worker无法消费消息"),
        });
    }
    Ok(())
}

/// 组合根：连接数据库与消息代理，按模式运行调度器或Worker宿主
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    database: DatabaseManager,
    broker: Arc<RabbitMqBroker>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {}", mode);
        check_mode(mode, &config)?;

        let database = DatabaseManager::new(&config.database)
            .await
            .context("创建数据库连接池失败")?;
        database.migrate().await.context("运行数据库迁移失败")?;

        let broker = Arc::new(RabbitMqBroker::new(config.message_queue.clone()));
        broker.connect().await.context("连接消息代理失败")?;

        Ok(Self {
            config,
            mode,
            database,
            broker,
        })
    }

    /// 运行到 `shutdown` 被取消
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!("启动应用程序，模式: {}", self.mode);

        let result = match self.mode {
            AppMode::Scheduler => self.run_scheduler(shutdown).await,
            _ => self.run_workers(shutdown).await,
        };

        self.database.close().await;
        result
    }

    async fn run_scheduler(&self, shutdown: CancellationToken) -> Result<()> {
        let broker: Arc<dyn MessageBroker> = self.broker.clone();
        let breakers = CircuitBreakerRegistry::new();
        let scheduler = TaskScheduler::new(
            self.database.scheduled_task_repository(),
            self.database.task_execution_repository(),
            MessageProducer::from_config(broker.clone(), &self.config.message_queue),
            self.config.scheduler.clone(),
            &breakers,
        )
        .await;

        scheduler.run(shutdown).await;

        if let Err(e) = broker.close().await {
            error!("关闭消息代理连接失败: {e}");
        }
        Ok(())
    }

    async fn run_workers(&self, shutdown: CancellationToken) -> Result<()> {
        let audit_logs = self.database.audit_log_repository();
        let executions = self.database.task_execution_repository();
        let registry = builtin_registry(audit_logs.clone(), executions.clone())
            .context("注册内置任务执行器失败")?;
        let email_sender =
            build_email_sender(&self.config.email).context("创建邮件发送器失败")?;

        let deps = WorkerDependencies {
            broker: self.broker.clone(),
            settings: ConsumerSettings::from_config(&self.config.message_queue),
            config: self.config.worker.clone(),
            email_sender,
            frontend_url: self.config.email.frontend_url.clone(),
            audit_logs,
            executions,
            registry: Arc::new(registry),
            file_processor: Arc::new(LoggingFileProcessor),
        };

        let host = WorkerHost::new(
            deps.build_consumers(&self.mode.consumer_kinds()),
            deps.broker.clone(),
            self.config.worker.shutdown_timeout(),
        );
        host.run(shutdown).await.context("Worker运行失败")
    }
}

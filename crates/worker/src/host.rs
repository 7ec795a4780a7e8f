use std::sync::Arc;
use std::time::Duration;

use taskbus_core::{traits::MessageBroker, Result, TaskbusError};
use taskbus_infrastructure::ManagedConsumer;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Worker宿主：并发运行一组消费者，并负责统一停机
///
/// 停机顺序：逐个请求消费者停止（单个失败只记录日志），
/// 取消共享令牌，在超时内等待全部退出，超时后强制中止，最后关闭代理连接。
pub struct WorkerHost {
    consumers: Vec<Arc<dyn ManagedConsumer>>,
    broker: Arc<dyn MessageBroker>,
    shutdown_timeout: Duration,
}

impl WorkerHost {
    pub fn new(
        consumers: Vec<Arc<dyn ManagedConsumer>>,
        broker: Arc<dyn MessageBroker>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            consumers,
            broker,
            shutdown_timeout,
        }
    }

    pub fn consumer_names(&self) -> Vec<String> {
        self.consumers
            .iter()
            .map(|consumer| consumer.name().to_string())
            .collect()
    }

    /// 运行到 `shutdown` 被取消；所有消费者提前退出时返回错误
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        if self.consumers.is_empty() {
            return Err(TaskbusError::Configuration("没有需要运行的消费者".to_string()));
        }

        let token = CancellationToken::new();
        let mut tasks = JoinSet::new();
        for consumer in &self.consumers {
            let consumer = consumer.clone();
            let token = token.clone();
            tasks.spawn(async move {
                let name = consumer.name().to_string();
                let result = consumer.start(token).await;
                (name, result)
            });
        }

        info!("Worker已启动 {} 个消费者: {:?}", self.consumers.len(), self.consumer_names());

        let mut unexpected_exit = false;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("收到停机信号，开始停止消费者");
                    break;
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((name, Ok(())))) => warn!("消费者 {} 提前退出", name),
                    Some(Ok((name, Err(e)))) => error!("消费者 {} 异常退出: {}", name, e),
                    Some(Err(e)) => error!("消费者任务崩溃: {}", e),
                    None => {
                        unexpected_exit = true;
                        break;
                    }
                }
            }
        }

        self.stop_all(&token, &mut tasks).await;

        if unexpected_exit {
            return Err(TaskbusError::Internal("所有消费者都已退出".to_string()));
        }
        Ok(())
    }

    async fn stop_all(
        &self,
        token: &CancellationToken,
        tasks: &mut JoinSet<(String, Result<()>)>,
    ) {
        for consumer in &self.consumers {
            if let Err(e) = consumer.stop() {
                warn!("停止消费者 {} 失败: {}", consumer.name(), e);
            }
        }
        token.cancel();

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, Ok(()))) => info!("消费者 {} 已退出", name),
                    Ok((name, Err(e))) => warn!("消费者 {} 退出时出错: {}", name, e),
                    Err(e) => error!("消费者任务崩溃: {}", e),
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "等待消费者退出超过 {}s，强制中止剩余 {} 个任务",
                self.shutdown_timeout.as_secs(),
                tasks.len()
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        if let Err(e) = self.broker.close().await {
            error!("关闭消息代理连接失败: {}", e);
        }
        info!("Worker已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumers::{ConsumerKind, WorkerDependencies};
    use crate::handlers::LoggingFileProcessor;
    use async_trait::async_trait;
    use taskbus_core::{config::WorkerConfig, models::routing, TaskExecutorRegistry};
    use taskbus_infrastructure::{BrokerEvent, ConsumerSettings, InMemoryBroker, MessageProducer};
    use taskbus_testing_utils::{
        MockAuditLogRepository, MockTaskExecutionRepository, RecordingEmailSender,
    };

    fn dependencies(broker: &InMemoryBroker, sender: &RecordingEmailSender) -> WorkerDependencies {
        WorkerDependencies {
            broker: Arc::new(broker.clone()),
            settings: ConsumerSettings {
                retry_delay_base: Duration::from_millis(5),
                retry_delay_max: Duration::from_millis(20),
            },
            config: WorkerConfig::default(),
            email_sender: Arc::new(sender.clone()),
            frontend_url: "https://app.example.com".to_string(),
            audit_logs: Arc::new(MockAuditLogRepository::new()),
            executions: Arc::new(MockTaskExecutionRepository::new()),
            registry: Arc::new(TaskExecutorRegistry::new()),
            file_processor: Arc::new(LoggingFileProcessor),
        }
    }

    /// 停止请求总是失败的消费者
    struct StubbornConsumer;

    #[async_trait]
    impl ManagedConsumer for StubbornConsumer {
        fn name(&self) -> &str {
            "stubborn"
        }

        async fn start(&self, shutdown: CancellationToken) -> Result<()> {
            shutdown.cancelled().await;
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            Err(TaskbusError::ConsumerNotStarted("stubborn".to_string()))
        }
    }

    /// 忽略取消信号的消费者
    struct HangingConsumer;

    #[async_trait]
    impl ManagedConsumer for HangingConsumer {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn start(&self, _shutdown: CancellationToken) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_verification_email_flows_end_to_end() {
        let broker = InMemoryBroker::default();
        let sender = RecordingEmailSender::new();
        let deps = dependencies(&broker, &sender);
        let host = WorkerHost::new(
            deps.build_consumers(&[ConsumerKind::Email]),
            deps.broker.clone(),
            Duration::from_secs(5),
        );

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(host.run(shutdown.clone()));

        // 先声明队列，避免消费者启动前发布的消息无法路由
        broker
            .declare_consumer_queue(&ConsumerKind::Email.spec(&deps.config))
            .await
            .unwrap();
        let producer = MessageProducer::new(Arc::new(broker.clone()), true);
        producer
            .send_verification_email("user@example.com", "alice", "tok-123")
            .await
            .unwrap();

        assert!(
            broker
                .wait_until(
                    |events| events
                        .iter()
                        .any(|e| matches!(e, BrokerEvent::Acked { queue, .. } if queue == "email_queue")),
                    Duration::from_secs(2),
                )
                .await
        );

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "user@example.com");
        assert!(sent[0]
            .html_body
            .contains("https://app.example.com/verify-email?token=tok-123"));

        shutdown.cancel();
        running.await.unwrap().unwrap();
        assert!(producer
            .send_email("x@example.com", "s", "h", None)
            .await
            .is_err());
        assert!(broker.events().iter().any(|e| matches!(
            e,
            BrokerEvent::Published { routing_key, .. } if routing_key == routing::EMAIL_VERIFICATION
        )));
    }

    #[tokio::test]
    async fn test_failed_stop_does_not_block_shutdown() {
        let broker = InMemoryBroker::default();
        let host = WorkerHost::new(
            vec![Arc::new(StubbornConsumer)],
            Arc::new(broker.clone()),
            Duration::from_secs(1),
        );

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(host.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_hanging_consumer_is_aborted_after_timeout() {
        let broker = InMemoryBroker::default();
        let host = WorkerHost::new(
            vec![Arc::new(HangingConsumer)],
            Arc::new(broker.clone()),
            Duration::from_millis(50),
        );

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), host.run(shutdown)).await;

        assert!(matches!(result, Ok(Ok(()))));
        let producer = MessageProducer::new(Arc::new(broker), true);
        assert!(producer.send_email("a@b.com", "s", "h", None).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_host_is_configuration_error() {
        let host = WorkerHost::new(
            Vec::new(),
            Arc::new(InMemoryBroker::default()),
            Duration::from_secs(1),
        );
        assert!(matches!(
            host.run(CancellationToken::new()).await,
            Err(TaskbusError::Configuration(_))
        ));
    }
}

use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream::FuturesUnordered, FutureExt, StreamExt};
use taskbus_core::{
    config::MessageQueueConfig,
    models::BrokerMessage,
    panic_message,
    retry::RetryPolicy,
    traits::{
        ConsumerSpec, DeliveryAcker, IncomingDelivery, MessageBroker, MessageHandler,
        PublishProperties,
    },
    Result, TaskbusError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 消费失败后重新发布的退避参数
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSettings {
    pub retry_delay_base: Duration,
    pub retry_delay_max: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self::from_config(&MessageQueueConfig::default())
    }
}

impl ConsumerSettings {
    pub fn from_config(config: &MessageQueueConfig) -> Self {
        Self {
            retry_delay_base: config.retry_delay_base(),
            retry_delay_max: config.retry_delay_max(),
        }
    }

    /// 第 `retry_count` 次重试前的等待时间：`min(base * 2^(n-1), max)`
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        RetryPolicy::new(retry_count, self.retry_delay_base, self.retry_delay_max)
            .without_jitter()
            .base_delay_for(retry_count)
    }
}

/// 消费者统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub processed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

#[derive(Default)]
struct ConsumerCounters {
    processed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

/// 可由Worker宿主统一启停的消费者
#[async_trait]
pub trait ManagedConsumer: Send + Sync {
    fn name(&self) -> &str;

    /// 阻塞直到 `shutdown` 被取消、`stop()` 被调用或消息流结束
    async fn start(&self, shutdown: CancellationToken) -> Result<()>;

    /// 请求停止；从未启动过的消费者返回 `ConsumerNotStarted`
    fn stop(&self) -> Result<()>;
}

/// 通用消息消费者
///
/// 每条消息的处理结果只有三种：成功后确认；处理失败且仍有重试额度时，
/// 退避后带着递增的 `retry_count` 重新发布到原路由键并确认原消息；
/// 反序列化失败或重试耗尽时拒绝且不重新入队，由代理转入 `{queue}_dlq`。
pub struct MessageConsumer<M: BrokerMessage> {
    spec: ConsumerSpec,
    handler: Arc<dyn MessageHandler<M>>,
    broker: Arc<dyn MessageBroker>,
    settings: ConsumerSettings,
    running: StdMutex<Option<CancellationToken>>,
    counters: ConsumerCounters,
    _message: PhantomData<fn() -> M>,
}

impl<M: BrokerMessage> MessageConsumer<M> {
    pub fn new(
        spec: ConsumerSpec,
        handler: Arc<dyn MessageHandler<M>>,
        broker: Arc<dyn MessageBroker>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            spec,
            handler,
            broker,
            settings,
            running: StdMutex::new(None),
            counters: ConsumerCounters::default(),
            _message: PhantomData,
        }
    }

    pub fn spec(&self) -> &ConsumerSpec {
        &self.spec
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
        }
    }

    /// 声明队列并持续消费，直到被停止
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let token = {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            if running.is_some() {
                return Err(TaskbusError::ConsumerAlreadyRunning(
                    self.spec.queue_name.clone(),
                ));
            }
            let token = shutdown.child_token();
            *running = Some(token.clone());
            token
        };

        let result = self.consume_loop(&token).await;

        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = None;
        result
    }

    pub fn stop(&self) -> Result<()> {
        match self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(token) => {
                info!("请求停止消费者 {}", self.spec.queue_name);
                token.cancel();
                Ok(())
            }
            None => Err(TaskbusError::ConsumerNotStarted(
                self.spec.queue_name.clone(),
            )),
        }
    }

    async fn consume_loop(&self, token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            return Ok(());
        }

        self.broker.declare_consumer_queue(&self.spec).await?;

        let consumer_tag = format!("{}-{}", self.spec.queue_name, uuid::Uuid::new_v4());
        let mut deliveries = self.broker.consume(&self.spec, &consumer_tag).await?;

        info!(
            "消费者 {} 已启动 (kind={}, bindings={:?}, prefetch={})",
            self.spec.queue_name,
            self.spec.message_kind,
            self.spec.routing_keys,
            self.spec.prefetch_count
        );

        // 同时处理的投递数不超过预取数，单条消息的重试退避不会阻塞其他消息
        let limit = usize::from(self.spec.prefetch_count.max(1));
        let mut in_flight = FuturesUnordered::new();
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!(
                        "消费者 {} 正在停止，等待 {} 条处理中的消息",
                        self.spec.queue_name,
                        in_flight.len()
                    );
                    break;
                }
                Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
                next = deliveries.next(), if in_flight.len() < limit => match next {
                    Some(Ok(delivery)) => in_flight.push(self.process_delivery(delivery, token)),
                    Some(Err(e)) => error!("消费者 {} 接收消息失败: {}", self.spec.queue_name, e),
                    None => {
                        warn!("消费者 {} 的消息流已结束", self.spec.queue_name);
                        break;
                    }
                }
            }
        }

        while in_flight.next().await.is_some() {}
        drop(deliveries);
        info!("消费者 {} 已停止", self.spec.queue_name);

        Ok(())
    }

    /// 处理一条投递，保证每条路径都对原消息做出确认或拒绝
    pub async fn process_delivery(&self, delivery: IncomingDelivery, token: &CancellationToken) {
        let IncomingDelivery {
            body,
            routing_key,
            redelivered,
            acker,
        } = delivery;

        let message = match M::decode(&routing_key, &body) {
            Ok(message) => message,
            Err(e) => {
                error!(
                    "队列 {} 收到无法解析的消息，直接转入死信队列: {}",
                    self.spec.queue_name, e
                );
                self.dead_letter(acker.as_ref()).await;
                return;
            }
        };

        let message_id = message.id().to_string();
        debug!(
            "处理 {} 消息 {} (retry_count={}, redelivered={})",
            M::KIND,
            message_id,
            message.envelope().retry_count(),
            redelivered
        );

        match self.invoke_handler(message).await {
            Ok(()) => {
                if let Err(e) = acker.ack().await {
                    error!("确认消息 {} 失败: {}", message_id, e);
                }
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("{} 消息 {} 处理失败: {}", M::KIND, message_id, e);
                self.retry_or_dead_letter(&body, &routing_key, acker.as_ref(), token)
                    .await;
            }
        }
    }

    async fn invoke_handler(&self, message: M) -> Result<()> {
        match AssertUnwindSafe(self.handler.handle(message))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(TaskbusError::Handler(format!(
                "处理器panic: {}",
                panic_message(&*panic)
            ))),
        }
    }

    async fn retry_or_dead_letter(
        &self,
        body: &[u8],
        routing_key: &str,
        acker: &dyn DeliveryAcker,
        token: &CancellationToken,
    ) {
        // 处理器可能修改过消息，从原始字节重新解码
        let mut message = match M::decode(routing_key, body) {
            Ok(message) => message,
            Err(e) => {
                error!("重新解析消息失败: {}", e);
                self.dead_letter(acker).await;
                return;
            }
        };

        if !message.envelope_mut().increment_retry() {
            let exhausted = TaskbusError::RetriesExhausted {
                message_id: message.id().to_string(),
                retry_count: message.envelope().retry_count(),
            };
            error!("{}，转入死信队列 {}", exhausted, self.spec.dead_letter_queue());
            self.dead_letter(acker).await;
            return;
        }

        let retry_count = message.envelope().retry_count();
        let delay = self.settings.retry_delay(retry_count);
        warn!(
            "消息 {} 将在 {}ms 后进行第 {}/{} 次重试",
            message.id(),
            delay.as_millis(),
            retry_count,
            message.envelope().max_retries
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = token.cancelled() => {
                debug!("消费者正在停止，立即重新发布消息 {}", message.id());
            }
        }

        match self.republish(&message, routing_key).await {
            Ok(()) => {
                if let Err(e) = acker.ack().await {
                    error!("确认已重新发布的消息 {} 失败: {}", message.id(), e);
                }
                self.counters.retried.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!("重新发布消息 {} 失败，转入死信队列: {}", message.id(), e);
                self.dead_letter(acker).await;
            }
        }
    }

    async fn republish(&self, message: &M, routing_key: &str) -> Result<()> {
        let payload = message.to_bytes()?;
        let properties = PublishProperties::for_message(message);
        self.broker
            .publish(self.broker.exchange(), routing_key, &payload, &properties)
            .await
    }

    async fn dead_letter(&self, acker: &dyn DeliveryAcker) {
        if let Err(e) = acker.reject(false).await {
            error!("拒绝消息失败 (queue={}): {}", self.spec.queue_name, e);
        }
        self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl<M: BrokerMessage> ManagedConsumer for MessageConsumer<M> {
    fn name(&self) -> &str {
        &self.spec.queue_name
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        MessageConsumer::start(self, shutdown).await
    }

    fn stop(&self) -> Result<()> {
        MessageConsumer::stop(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory_queue::{BrokerEvent, InMemoryBroker};
    use crate::producer::MessageProducer;
    use std::sync::atomic::AtomicUsize;
    use taskbus_core::models::{routing, EmailMessage};

    struct CountingHandler {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MessageHandler<EmailMessage> for CountingHandler {
        async fn handle(&self, _message: EmailMessage) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(TaskbusError::Handler("smtp down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn fast_settings() -> ConsumerSettings {
        ConsumerSettings {
            retry_delay_base: Duration::from_millis(1),
            retry_delay_max: Duration::from_millis(4),
        }
    }

    fn consumer(
        broker: &InMemoryBroker,
        fail: bool,
    ) -> (Arc<MessageConsumer<EmailMessage>>, Arc<CountingHandler>) {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            fail,
        });
        let consumer = MessageConsumer::new(
            ConsumerSpec::new("email_queue", &["email.*"], 10, EmailMessage::KIND),
            handler.clone(),
            Arc::new(broker.clone()),
            fast_settings(),
        );
        (Arc::new(consumer), handler)
    }

    fn count(events: &[BrokerEvent], predicate: impl Fn(&BrokerEvent) -> bool) -> usize {
        events.iter().filter(|event| predicate(event)).count()
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let settings = ConsumerSettings {
            retry_delay_base: Duration::from_secs(1),
            retry_delay_max: Duration::from_secs(5),
        };
        assert_eq!(settings.retry_delay(1), Duration::from_secs(1));
        assert_eq!(settings.retry_delay(3), Duration::from_secs(4));
        assert_eq!(settings.retry_delay(4), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stop_before_start_is_error() {
        let broker = InMemoryBroker::default();
        let (consumer, _) = consumer(&broker, false);
        assert!(matches!(
            consumer.stop(),
            Err(TaskbusError::ConsumerNotStarted(_))
        ));
    }

    #[tokio::test]
    async fn test_successful_message_is_acked() {
        let broker = InMemoryBroker::default();
        let (consumer, handler) = consumer(&broker, false);
        // 队列声明是幂等的，先声明以免发布时无队列可路由
        broker
            .declare_consumer_queue(consumer.spec())
            .await
            .unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let consumer = consumer.clone();
            let shutdown = shutdown.clone();
            async move { consumer.start(shutdown).await }
        });

        let producer = MessageProducer::new(Arc::new(broker.clone()), true);
        producer
            .send_email("a@b.com", "hi", "<p>hi</p>", None)
            .await
            .unwrap();

        assert!(broker
            .wait_until(
                |events| events.iter().any(|e| matches!(e, BrokerEvent::Acked { .. })),
                Duration::from_secs(2)
            )
            .await);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(consumer.stats().processed, 1);

        consumer.stop().unwrap();
        task.await.unwrap().unwrap();
        assert!(!consumer.is_running());
    }

    #[tokio::test]
    async fn test_failing_handler_retries_then_dead_letters() {
        let broker = InMemoryBroker::default();
        let (consumer, handler) = consumer(&broker, true);
        let spec = consumer.spec().clone();
        broker.declare_consumer_queue(&spec).await.unwrap();

        let message = EmailMessage::new("a@b.com", "hi", "<p>hi</p>").with_max_retries(3);
        MessageProducer::new(Arc::new(broker.clone()), true)
            .send(&message)
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let consumer = consumer.clone();
            let shutdown = shutdown.clone();
            async move { consumer.start(shutdown).await }
        });

        assert!(broker
            .wait_until(
                |events| events
                    .iter()
                    .any(|e| matches!(e, BrokerEvent::DeadLettered { .. })),
                Duration::from_secs(5)
            )
            .await);
        shutdown.cancel();
        task.await.unwrap().unwrap();

        let events = broker.events();
        let published = count(&events, |e| {
            matches!(e, BrokerEvent::Published { routing_key, .. } if routing_key == routing::EMAIL_SEND)
        });
        // 首次发布加3次重新发布
        assert_eq!(published, 4);
        assert_eq!(
            count(&events, |e| matches!(e, BrokerEvent::DeadLettered { .. })),
            1
        );
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);

        let republished: Vec<EmailMessage> = broker.published_messages(routing::EMAIL_SEND);
        let retry_counts: Vec<u32> = republished
            .iter()
            .map(|m| m.envelope.retry_count())
            .collect();
        assert_eq!(retry_counts, vec![0, 1, 2, 3]);
        assert!(republished.iter().all(|m| m.envelope.id == message.envelope.id));

        let dead = broker.dead_letters("email_queue");
        assert_eq!(dead.len(), 1);
        assert_eq!(
            EmailMessage::from_bytes(&dead[0]).unwrap().envelope.retry_count(),
            3
        );
        assert_eq!(
            consumer.stats(),
            ConsumerStats {
                processed: 0,
                retried: 3,
                dead_lettered: 1
            }
        );
    }

    #[tokio::test]
    async fn test_undecodable_message_goes_straight_to_dead_letter() {
        let broker = InMemoryBroker::default();
        let (consumer, handler) = consumer(&broker, false);
        broker
            .declare_consumer_queue(consumer.spec())
            .await
            .unwrap();

        let props = PublishProperties::for_message(&EmailMessage::new("a@b.com", "s", "h"));
        broker
            .publish("taskbus", routing::EMAIL_SEND, b"not json", &props)
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let consumer = consumer.clone();
            let shutdown = shutdown.clone();
            async move { consumer.start(shutdown).await }
        });

        assert!(broker
            .wait_until(
                |events| events
                    .iter()
                    .any(|e| matches!(e, BrokerEvent::DeadLettered { .. })),
                Duration::from_secs(2)
            )
            .await);
        shutdown.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(broker.published(routing::EMAIL_SEND).len(), 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(broker.dead_letters("email_queue"), vec![b"not json".to_vec()]);
    }

    #[tokio::test]
    async fn test_second_start_while_running_is_rejected() {
        let broker = InMemoryBroker::default();
        let (consumer, _) = consumer(&broker, false);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let consumer = consumer.clone();
            let shutdown = shutdown.clone();
            async move { consumer.start(shutdown).await }
        });

        assert!(broker
            .wait_until(|_| consumer.is_running(), Duration::from_secs(1))
            .await);
        assert!(matches!(
            consumer.start(shutdown.clone()).await,
            Err(TaskbusError::ConsumerAlreadyRunning(_))
        ));

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    /// 主题为 "bad" 的邮件总是失败
    struct SubjectHandler;

    #[async_trait]
    impl MessageHandler<EmailMessage> for SubjectHandler {
        async fn handle(&self, message: EmailMessage) -> Result<()> {
            if message.subject == "bad" {
                Err(TaskbusError::Handler("rejected".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_backoff_does_not_block_other_deliveries() {
        let broker = InMemoryBroker::default();
        let consumer = Arc::new(MessageConsumer::new(
            ConsumerSpec::new("email_queue", &["email.*"], 4, EmailMessage::KIND),
            Arc::new(SubjectHandler),
            Arc::new(broker.clone()),
            ConsumerSettings {
                retry_delay_base: Duration::from_millis(800),
                retry_delay_max: Duration::from_millis(800),
            },
        ));
        broker
            .declare_consumer_queue(consumer.spec())
            .await
            .unwrap();

        let producer = MessageProducer::new(Arc::new(broker.clone()), true);
        let bad = EmailMessage::new("a@b.com", "bad", "<p>x</p>");
        let good = EmailMessage::new("a@b.com", "good", "<p>x</p>");
        producer.send(&bad).await.unwrap();
        producer.send(&good).await.unwrap();

        let shutdown = CancellationToken::new();
        let started = tokio::time::Instant::now();
        let task = tokio::spawn({
            let consumer = consumer.clone();
            let shutdown = shutdown.clone();
            async move { consumer.start(shutdown).await }
        });

        let good_id = good.envelope.id.clone();
        assert!(broker
            .wait_until(
                |events| events.iter().any(
                    |e| matches!(e, BrokerEvent::Acked { message_id, .. } if *message_id == good_id)
                ),
                Duration::from_secs(2)
            )
            .await);
        assert!(started.elapsed() < Duration::from_millis(600));
        // 失败的消息仍在退避中，尚未重新发布
        assert_eq!(broker.published(routing::EMAIL_SEND).len(), 2);

        shutdown.cancel();
        task.await.unwrap().unwrap();
        // 停机时处理中的重试被立即重新发布，而不是丢失
        assert_eq!(broker.published(routing::EMAIL_SEND).len(), 3);
        assert_eq!(consumer.stats().processed, 1);
        assert_eq!(consumer.stats().retried, 1);
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use taskbus_core::{
    models::BrokerMessage,
    traits::{
        ConsumerSpec, DeliveryAcker, DeliveryStream, IncomingDelivery, MessageBroker,
        PublishProperties,
    },
    Result, TaskbusError,
};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

/// 内存代理记录的事件，测试通过它观察消息流转
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    Published {
        routing_key: String,
        message_id: String,
        payload: Vec<u8>,
    },
    Acked {
        queue: String,
        message_id: String,
    },
    Rejected {
        queue: String,
        message_id: String,
        requeue: bool,
    },
    DeadLettered {
        queue: String,
        message_id: String,
    },
    /// 没有任何队列绑定匹配该路由键
    Unroutable {
        routing_key: String,
        message_id: String,
    },
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    routing_key: String,
    message_id: String,
    payload: Vec<u8>,
    redelivered: bool,
}

struct QueueSlot {
    bindings: Vec<String>,
    sender: Option<mpsc::UnboundedSender<QueuedMessage>>,
    receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<QueuedMessage>>>,
    depth: Arc<AtomicUsize>,
}

impl QueueSlot {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            bindings: Vec::new(),
            sender: Some(sender),
            receiver: Arc::new(AsyncMutex::new(receiver)),
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn enqueue(&self, message: QueuedMessage) -> bool {
        match &self.sender {
            Some(sender) if sender.send(message).is_ok() => {
                self.depth.fetch_add(1, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueSlot>,
    dead_letters: HashMap<String, Vec<Vec<u8>>>,
    events: Vec<BrokerEvent>,
    closed: bool,
}

/// 内存消息代理
///
/// 实现与RabbitMQ一致的主题路由（`*` 匹配一个单词，`#` 匹配零个或多个单词）
/// 以及拒绝即进入死信队列的语义，适用于测试与单机部署。
#[derive(Clone)]
pub struct InMemoryBroker {
    exchange: String,
    state: Arc<StdMutex<BrokerState>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new("taskbus")
    }
}

impl InMemoryBroker {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            state: Arc::new(StdMutex::new(BrokerState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        lock_state(&self.state)
    }

    /// 全部事件的快照
    pub fn events(&self) -> Vec<BrokerEvent> {
        self.lock().events.clone()
    }

    /// 发布到指定路由键的消息体，按发布顺序
    pub fn published(&self, routing_key: &str) -> Vec<Vec<u8>> {
        self.lock()
            .events
            .iter()
            .filter_map(|event| match event {
                BrokerEvent::Published {
                    routing_key: key,
                    payload,
                    ..
                } if key == routing_key => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// 发布到指定路由键并能解码为 `M` 的消息
    pub fn published_messages<M: BrokerMessage>(&self, routing_key: &str) -> Vec<M> {
        self.published(routing_key)
            .iter()
            .filter_map(|payload| M::from_bytes(payload).ok())
            .collect()
    }

    /// 进入 `{queue}_dlq` 的消息体
    pub fn dead_letters(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .dead_letters
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// 已入队但尚未被消费者取走的消息数
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map(|slot| slot.depth.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// 轮询事件日志直到条件成立，超时返回 `false`
    pub async fn wait_until<F>(&self, predicate: F, timeout: Duration) -> bool
    where
        F: Fn(&[BrokerEvent]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(&self.lock().events) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

fn lock_state(state: &StdMutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// AMQP主题交换机的路由键匹配
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    fn exchange(&self) -> &str {
        &self.exchange
    }

    async fn declare_consumer_queue(&self, spec: &ConsumerSpec) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(TaskbusError::MessageQueue("内存代理已关闭".to_string()));
        }

        let slot = state
            .queues
            .entry(spec.queue_name.clone())
            .or_insert_with(QueueSlot::new);
        for routing_key in &spec.routing_keys {
            if !slot.bindings.contains(routing_key) {
                slot.bindings.push(routing_key.clone());
            }
        }
        state.dead_letters.entry(spec.queue_name.clone()).or_default();

        debug!("内存队列 {} 绑定 {:?}", spec.queue_name, spec.routing_keys);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: &PublishProperties,
    ) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(TaskbusError::Publish("内存代理已关闭".to_string()));
        }

        state.events.push(BrokerEvent::Published {
            routing_key: routing_key.to_string(),
            message_id: properties.message_id.clone(),
            payload: payload.to_vec(),
        });

        let mut routed = 0;
        if exchange == self.exchange {
            for slot in state.queues.values() {
                if slot
                    .bindings
                    .iter()
                    .any(|pattern| topic_matches(pattern, routing_key))
                {
                    let message = QueuedMessage {
                        routing_key: routing_key.to_string(),
                        message_id: properties.message_id.clone(),
                        payload: payload.to_vec(),
                        redelivered: false,
                    };
                    if slot.enqueue(message) {
                        routed += 1;
                    }
                }
            }
        }

        if routed == 0 {
            warn!("消息 {} 无法路由: {}/{}", properties.message_id, exchange, routing_key);
            state.events.push(BrokerEvent::Unroutable {
                routing_key: routing_key.to_string(),
                message_id: properties.message_id.clone(),
            });
        }
        Ok(())
    }

    async fn consume(&self, spec: &ConsumerSpec, consumer_tag: &str) -> Result<DeliveryStream> {
        let (receiver, depth) = {
            let state = self.lock();
            let slot = state.queues.get(&spec.queue_name).ok_or_else(|| {
                TaskbusError::MessageQueue(format!("队列 {} 尚未声明", spec.queue_name))
            })?;
            (slot.receiver.clone(), slot.depth.clone())
        };

        debug!("为内存队列 {} 创建消费者: {}", spec.queue_name, consumer_tag);

        let state = self.state.clone();
        let queue = spec.queue_name.clone();
        let stream = futures::stream::unfold(
            (receiver, depth, state, queue),
            |(receiver, depth, state, queue)| async move {
                let next = receiver.lock().await.recv().await;
                let message = next?;
                depth.fetch_sub(1, Ordering::SeqCst);

                let delivery = IncomingDelivery {
                    body: message.payload.clone(),
                    routing_key: message.routing_key.clone(),
                    redelivered: message.redelivered,
                    acker: Box::new(InMemoryAcker {
                        state: state.clone(),
                        queue: queue.clone(),
                        message,
                    }),
                };
                Some((Ok(delivery), (receiver, depth, state, queue)))
            },
        );
        Ok(stream.boxed())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.lock();
        if !state.closed {
            state.closed = true;
            for slot in state.queues.values_mut() {
                slot.sender = None;
            }
            info!("内存消息代理已关闭");
        }
        Ok(())
    }
}

struct InMemoryAcker {
    state: Arc<StdMutex<BrokerState>>,
    queue: String,
    message: QueuedMessage,
}

#[async_trait]
impl DeliveryAcker for InMemoryAcker {
    async fn ack(&self) -> Result<()> {
        lock_state(&self.state).events.push(BrokerEvent::Acked {
            queue: self.queue.clone(),
            message_id: self.message.message_id.clone(),
        });
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<()> {
        let mut state = lock_state(&self.state);
        state.events.push(BrokerEvent::Rejected {
            queue: self.queue.clone(),
            message_id: self.message.message_id.clone(),
            requeue,
        });

        if requeue {
            let message = QueuedMessage {
                redelivered: true,
                ..self.message.clone()
            };
            let requeued = state
                .queues
                .get(&self.queue)
                .map(|slot| slot.enqueue(message))
                .unwrap_or(false);
            if requeued {
                return Ok(());
            }
        }

        state
            .dead_letters
            .entry(self.queue.clone())
            .or_default()
            .push(self.message.payload.clone());
        state.events.push(BrokerEvent::DeadLettered {
            queue: self.queue.clone(),
            message_id: self.message.message_id.clone(),
        });
        Ok(())
    }
}

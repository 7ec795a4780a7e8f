//! 消息代理接口
//!
//! 生产者与消费者只依赖这里的抽象，RabbitMQ与内存实现位于infrastructure crate。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::models::{BrokerMessage, MessagePriority};
use crate::Result;

/// 死信路由键：`{queue}.dead`
pub fn dead_letter_routing_key(queue_name: &str) -> String {
    format!("{queue_name}.dead")
}

/// 死信队列名：`{queue}_dlq`
pub fn dead_letter_queue_name(queue_name: &str) -> String {
    format!("{queue_name}_dlq")
}

/// 发布时携带的消息属性
#[derive(Debug, Clone, PartialEq)]
pub struct PublishProperties {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub priority: MessagePriority,
    pub persistent: bool,
    pub content_type: String,
}

impl PublishProperties {
    pub fn for_message<M: BrokerMessage>(message: &M) -> Self {
        let envelope = message.envelope();
        Self {
            message_id: envelope.id.clone(),
            timestamp: envelope.timestamp,
            priority: envelope.priority,
            persistent: true,
            content_type: "application/json".to_string(),
        }
    }
}

/// 消费者描述：队列、绑定模式、预取数量
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSpec {
    pub queue_name: String,
    pub routing_keys: Vec<String>,
    pub prefetch_count: u16,
    /// 消息种类，仅用于日志
    pub message_kind: &'static str,
}

impl ConsumerSpec {
    pub fn new(
        queue_name: impl Into<String>,
        routing_keys: &[&str],
        prefetch_count: u16,
        message_kind: &'static str,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            routing_keys: routing_keys.iter().map(|key| key.to_string()).collect(),
            prefetch_count,
            message_kind,
        }
    }

    pub fn dead_letter_routing_key(&self) -> String {
        dead_letter_routing_key(&self.queue_name)
    }

    pub fn dead_letter_queue(&self) -> String {
        dead_letter_queue_name(&self.queue_name)
    }
}

/// 投递确认句柄
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self) -> Result<()>;

    /// 拒绝消息；`requeue=false` 时消息进入死信交换机
    async fn reject(&self, requeue: bool) -> Result<()>;
}

/// 一条待处理的投递
pub struct IncomingDelivery {
    pub body: Vec<u8>,
    pub routing_key: String,
    pub redelivered: bool,
    pub acker: Box<dyn DeliveryAcker>,
}

impl std::fmt::Debug for IncomingDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingDelivery")
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish()
    }
}

pub type DeliveryStream = BoxStream<'static, Result<IncomingDelivery>>;

/// 消息代理抽象接口
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// 主交换机名称
    fn exchange(&self) -> &str;

    /// 声明消费队列、绑定以及配套的死信队列
    async fn declare_consumer_queue(&self, spec: &ConsumerSpec) -> Result<()>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: &PublishProperties,
    ) -> Result<()>;

    async fn consume(&self, spec: &ConsumerSpec, consumer_tag: &str) -> Result<DeliveryStream>;

    /// 释放连接资源
    async fn close(&self) -> Result<()>;
}

use std::sync::Arc;

use taskbus_core::{
    config::MessageQueueConfig,
    models::{
        AuditLogMessage, BrokerMessage, DomainEventMessage, EmailMessage,
        EmailVerificationMessage, FileOperation, FileProcessingMessage,
        PasswordResetEmailMessage, ScheduledTaskMessage, TriggeredBy, UserLoggedInEvent,
        UserRegisteredEvent, DEFAULT_MAX_RETRIES,
    },
    traits::{MessageBroker, PublishProperties},
    Result,
};
use tracing::{debug, error, warn};

/// 消息生产者
///
/// 负责序列化消息并以持久化、带优先级的方式发布到主题交换机。
/// 消息队列被配置关闭时，发布操作只记录告警并丢弃消息。
/// 便捷发送方法构造的消息使用生产者的默认最大重试次数。
#[derive(Clone)]
pub struct MessageProducer {
    broker: Arc<dyn MessageBroker>,
    enabled: bool,
    default_max_retries: u32,
}

impl MessageProducer {
    pub fn new(broker: Arc<dyn MessageBroker>, enabled: bool) -> Self {
        Self {
            broker,
            enabled,
            default_max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn from_config(broker: Arc<dyn MessageBroker>, config: &MessageQueueConfig) -> Self {
        Self::new(broker, config.enabled).with_default_max_retries(config.default_max_retries)
    }

    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    pub fn default_max_retries(&self) -> u32 {
        self.default_max_retries
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 发布消息
    ///
    /// `exchange` 为空时使用代理的主交换机。序列化失败返回 `Serialization`，
    /// 代理错误返回 `Publish` 或 `BrokerNotInitialized`，两者都不在此处重试。
    pub async fn publish<M: BrokerMessage>(
        &self,
        message: &M,
        routing_key: &str,
        exchange: Option<&str>,
    ) -> Result<()> {
        if !self.enabled {
            warn!(
                "消息队列已禁用，丢弃 {} 消息 {} (routing_key={})",
                M::KIND,
                message.id(),
                routing_key
            );
            return Ok(());
        }

        let payload = message.to_bytes()?;
        let properties = PublishProperties::for_message(message);
        let exchange = exchange.unwrap_or_else(|| self.broker.exchange());

        self.broker
            .publish(exchange, routing_key, &payload, &properties)
            .await
            .inspect_err(|e| {
                error!(
                    "发布 {} 消息 {} 到 {}/{} 失败: {}",
                    M::KIND,
                    message.id(),
                    exchange,
                    routing_key,
                    e
                );
            })?;

        debug!(
            "{} 消息 {} 已发布 (routing_key={}, retry_count={})",
            M::KIND,
            message.id(),
            routing_key,
            message.envelope().retry_count()
        );
        Ok(())
    }

    /// 使用消息自身的路由键发布
    pub async fn send<M: BrokerMessage>(&self, message: &M) -> Result<String> {
        self.publish(message, &message.routing_key(), None).await?;
        Ok(message.id().to_string())
    }

    async fn send_new<M: BrokerMessage>(&self, message: M) -> Result<String> {
        self.send(&message.with_max_retries(self.default_max_retries))
            .await
    }

    pub async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_content: &str,
        text_content: Option<&str>,
    ) -> Result<String> {
        let mut message = EmailMessage::new(to_email, subject, html_content);
        if let Some(text) = text_content {
            message = message.with_text(text);
        }
        self.send_new(message).await
    }

    pub async fn send_password_reset_email(
        &self,
        to_email: &str,
        username: &str,
        reset_token: &str,
    ) -> Result<String> {
        self.send_new(PasswordResetEmailMessage::new(to_email, username, reset_token))
            .await
    }

    pub async fn send_verification_email(
        &self,
        to_email: &str,
        username: &str,
        verification_token: &str,
    ) -> Result<String> {
        self.send_new(EmailVerificationMessage::new(
            to_email,
            username,
            verification_token,
        ))
        .await
    }

    pub async fn publish_event(
        &self,
        event_type: &str,
        aggregate_id: &str,
        aggregate_type: &str,
        payload: serde_json::Value,
    ) -> Result<String> {
        self.send_new(DomainEventMessage::new(
            event_type,
            aggregate_id,
            aggregate_type,
            payload,
        ))
        .await
    }

    pub async fn publish_user_registered(
        &self,
        user_id: i64,
        email: &str,
        username: &str,
    ) -> Result<String> {
        self.send_new(UserRegisteredEvent::new(user_id, email, username))
            .await
    }

    pub async fn publish_user_logged_in(
        &self,
        user_id: i64,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<String> {
        let mut event = UserLoggedInEvent::new(user_id);
        event.ip_address = ip_address.map(str::to_string);
        event.user_agent = user_agent.map(str::to_string);
        self.send_new(event).await
    }

    /// 审计日志由调用方构造，保留其自身的重试设置
    pub async fn publish_audit_log(&self, entry: AuditLogMessage) -> Result<String> {
        self.send(&entry).await
    }

    pub async fn request_file_processing(
        &self,
        file_id: i64,
        file_path: &str,
        operation: FileOperation,
        user_id: Option<i64>,
    ) -> Result<String> {
        let mut message = FileProcessingMessage::new(file_id, file_path, operation);
        message.user_id = user_id;
        self.send_new(message).await
    }

    pub async fn dispatch_scheduled_task(
        &self,
        task_id: i64,
        task_name: &str,
        task_type: &str,
        execution_id: i64,
        context: serde_json::Value,
        triggered_by: TriggeredBy,
    ) -> Result<String> {
        self.send_new(ScheduledTaskMessage::new(
            task_id,
            task_name,
            task_type,
            execution_id,
            context,
            triggered_by,
        ))
        .await
    }
}

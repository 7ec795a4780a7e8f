use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use taskbus_core::{
    models::{
        AuditLogEntry, AuditOutcome, BrokerMessage, DomainEventMessage, UserLoggedInEvent,
        UserRegisteredEvent,
    },
    traits::{AuditLogRepository, EmailSender, MessageHandler},
    Result,
};
use tracing::info;

use crate::messages::EventJob;

/// 登录事件写入审计日志时使用的动作名
pub const USER_LOGIN_ACTION: &str = "user.login";

/// 领域事件处理器
pub struct EventHandler {
    sender: Arc<dyn EmailSender>,
    audit_logs: Arc<dyn AuditLogRepository>,
}

impl EventHandler {
    pub fn new(sender: Arc<dyn EmailSender>, audit_logs: Arc<dyn AuditLogRepository>) -> Self {
        Self { sender, audit_logs }
    }

    async fn on_domain_event(&self, event: DomainEventMessage) -> Result<()> {
        info!(
            event_type = %event.event_type,
            aggregate_type = %event.aggregate_type,
            aggregate_id = %event.aggregate_id,
            "收到领域事件 {}",
            event.id()
        );
        Ok(())
    }

    async fn on_user_registered(&self, event: UserRegisteredEvent) -> Result<()> {
        let html = format!(
            "<p>{}，欢迎加入！</p><p>您的账号已创建成功。</p>",
            html_escape::encode_text(&event.username)
        );
        let text = format!("{}，欢迎加入！您的账号已创建成功。", event.username);

        self.sender
            .send(&event.email, "欢迎加入", &html, Some(&text))
            .await?;
        info!("已向新用户 {} 发送欢迎邮件", event.user_id);
        Ok(())
    }

    async fn on_user_logged_in(&self, event: UserLoggedInEvent) -> Result<()> {
        let entry = AuditLogEntry {
            id: 0,
            message_id: event.id().to_string(),
            user_id: Some(event.user_id),
            action: USER_LOGIN_ACTION.to_string(),
            resource_type: "user".to_string(),
            resource_id: Some(event.user_id.to_string()),
            details: json!({}),
            ip_address: event.ip_address.clone(),
            user_agent: event.user_agent.clone(),
            outcome: AuditOutcome::Success,
            created_at: event.envelope.timestamp,
        };

        self.audit_logs.insert(&entry).await?;
        info!("记录用户 {} 登录", event.user_id);
        Ok(())
    }
}

#[async_trait]
impl MessageHandler<EventJob> for EventHandler {
    async fn handle(&self, message: EventJob) -> Result<()> {
        match message {
            EventJob::Domain(event) => self.on_domain_event(event).await,
            EventJob::UserRegistered(event) => self.on_user_registered(event).await,
            EventJob::UserLoggedIn(event) => self.on_user_logged_in(event).await,
        }
    }
}

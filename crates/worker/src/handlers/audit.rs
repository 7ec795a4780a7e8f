use std::sync::Arc;

use async_trait::async_trait;
use taskbus_core::{
    models::{AuditLogEntry, AuditLogMessage},
    traits::{AuditLogRepository, MessageHandler},
    Result,
};
use tracing::debug;

/// 审计日志处理器，持有独立的仓储句柄
pub struct AuditLogHandler {
    repository: Arc<dyn AuditLogRepository>,
}

impl AuditLogHandler {
    pub fn new(repository: Arc<dyn AuditLogRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl MessageHandler<AuditLogMessage> for AuditLogHandler {
    async fn handle(&self, message: AuditLogMessage) -> Result<()> {
        let entry = self
            .repository
            .insert(&AuditLogEntry::from(&message))
            .await?;
        debug!(
            "审计日志已写入: {} {} (ID: {})",
            entry.action, entry.resource_type, entry.id
        );
        Ok(())
    }
}

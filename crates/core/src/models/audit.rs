use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::{AuditLogMessage, AuditOutcome};

/// 持久化的审计日志行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    /// 来源消息ID，重复投递时可据此排查
    pub message_id: String,
    pub user_id: Option<i64>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub outcome: AuditOutcome,
    pub created_at: DateTime<Utc>,
}

impl From<&AuditLogMessage> for AuditLogEntry {
    fn from(message: &AuditLogMessage) -> Self {
        Self {
            id: 0,
            message_id: message.envelope.id.clone(),
            user_id: message.user_id,
            action: message.action.clone(),
            resource_type: message.resource_type.clone(),
            resource_id: message.resource_id.clone(),
            details: message.details.clone(),
            ip_address: message.ip_address.clone(),
            user_agent: message.user_agent.clone(),
            outcome: message.outcome,
            created_at: message.envelope.timestamp,
        }
    }
}

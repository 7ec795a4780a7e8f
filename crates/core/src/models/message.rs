use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use super::task_execution::TriggeredBy;
use crate::errors::{Result, TaskbusError};

/// 默认最大重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 路由键约定
pub mod routing {
    pub const EMAIL_SEND: &str = "email.send";
    pub const EMAIL_PASSWORD_RESET: &str = "email.password_reset";
    pub const EMAIL_VERIFICATION: &str = "email.verification";
    pub const AUDIT_LOG: &str = "audit.log";
    pub const EVENT_USER_REGISTERED: &str = "event.user.registered";
    pub const EVENT_USER_LOGGED_IN: &str = "event.user.logged_in";

    pub fn event(event_type: &str) -> String {
        format!("event.{event_type}")
    }

    pub fn file_process(operation: &str) -> String {
        format!("file.process.{operation}")
    }

    pub fn task_execute(task_type: &str) -> String {
        format!("task.execute.{task_type}")
    }
}

/// 消息优先级，数值直接映射为AMQP优先级
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessagePriority {
    Low = 1,
    #[default]
    Normal = 5,
    High = 7,
    Critical = 9,
}

impl TryFrom<u8> for MessagePriority {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(MessagePriority::Low),
            5 => Ok(MessagePriority::Normal),
            7 => Ok(MessagePriority::High),
            9 => Ok(MessagePriority::Critical),
            other => Err(format!("无效的消息优先级: {other}")),
        }
    }
}

impl From<MessagePriority> for u8 {
    fn from(priority: MessagePriority) -> Self {
        priority as u8
    }
}

/// 消息信封：所有消息共享的元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default)]
    retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}

impl Envelope {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            priority: MessagePriority::Normal,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// 是否还能再重试一次
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// 增加重试计数；重试已耗尽时不做修改并返回false
    pub fn increment_retry(&mut self) -> bool {
        if !self.can_retry() {
            return false;
        }
        self.retry_count += 1;
        true
    }

    pub fn is_retry_exhausted(&self) -> bool {
        !self.can_retry()
    }
}

/// 可在消息代理上传输的消息
pub trait BrokerMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 消息种类标识，用于日志和队列描述
    const KIND: &'static str;

    fn envelope(&self) -> &Envelope;

    fn envelope_mut(&mut self) -> &mut Envelope;

    /// 默认路由键
    fn routing_key(&self) -> String;

    fn id(&self) -> &str {
        &self.envelope().id
    }

    fn with_priority(mut self, priority: MessagePriority) -> Self
    where
        Self: Sized,
    {
        self.envelope_mut().priority = priority;
        self
    }

    fn with_max_retries(mut self, max_retries: u32) -> Self
    where
        Self: Sized,
    {
        self.envelope_mut().max_retries = max_retries;
        self
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            TaskbusError::Serialization(format!("{} 消息 {}: {e}", Self::KIND, self.id()))
        })
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized,
    {
        serde_json::from_slice(bytes)
            .map_err(|e| TaskbusError::Deserialization(format!("{} 消息: {e}", Self::KIND)))
    }

    /// 按投递的路由键解码，同一队列承载多种消息时由实现方选择具体类型
    fn decode(routing_key: &str, bytes: &[u8]) -> Result<Self>
    where
        Self: Sized,
    {
        let _ = routing_key;
        Self::from_bytes(bytes)
    }
}

macro_rules! broker_message {
    ($ty:ty, $kind:expr, |$msg:ident| $routing:expr) => {
        impl BrokerMessage for $ty {
            const KIND: &'static str = $kind;

            fn envelope(&self) -> &Envelope {
                &self.envelope
            }

            fn envelope_mut(&mut self) -> &mut Envelope {
                &mut self.envelope
            }

            fn routing_key(&self) -> String {
                let $msg = self;
                $routing
            }
        }
    };
}

/// 普通邮件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub to_email: String,
    pub subject: String,
    pub html_content: String,
    #[serde(default)]
    pub text_content: Option<String>,
}

impl EmailMessage {
    pub fn new(
        to_email: impl Into<String>,
        subject: impl Into<String>,
        html_content: impl Into<String>,
    ) -> Self {
        Self {
            envelope: Envelope::new(),
            to_email: to_email.into(),
            subject: subject.into(),
            html_content: html_content.into(),
            text_content: None,
        }
    }

    pub fn with_text(mut self, text_content: impl Into<String>) -> Self {
        self.text_content = Some(text_content.into());
        self
    }
}

broker_message!(EmailMessage, "email_send", |_m| routing::EMAIL_SEND.to_string());

/// 密码重置邮件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordResetEmailMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub to_email: String,
    pub username: String,
    pub reset_token: String,
}

impl PasswordResetEmailMessage {
    pub fn new(
        to_email: impl Into<String>,
        username: impl Into<String>,
        reset_token: impl Into<String>,
    ) -> Self {
        Self {
            envelope: Envelope::new().with_priority(MessagePriority::High),
            to_email: to_email.into(),
            username: username.into(),
            reset_token: reset_token.into(),
        }
    }
}

broker_message!(PasswordResetEmailMessage, "password_reset_email", |_m| {
    routing::EMAIL_PASSWORD_RESET.to_string()
});

/// 邮箱验证邮件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailVerificationMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub to_email: String,
    pub username: String,
    pub verification_token: String,
}

impl EmailVerificationMessage {
    pub fn new(
        to_email: impl Into<String>,
        username: impl Into<String>,
        verification_token: impl Into<String>,
    ) -> Self {
        Self {
            envelope: Envelope::new().with_priority(MessagePriority::High),
            to_email: to_email.into(),
            username: username.into(),
            verification_token: verification_token.into(),
        }
    }
}

broker_message!(EmailVerificationMessage, "email_verification", |_m| {
    routing::EMAIL_VERIFICATION.to_string()
});

/// 文件处理操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOperation {
    ExtractMetadata,
    VirusScan,
    GenerateThumbnail,
}

impl FileOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileOperation::ExtractMetadata => "extract_metadata",
            FileOperation::VirusScan => "virus_scan",
            FileOperation::GenerateThumbnail => "generate_thumbnail",
        }
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 文件处理请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileProcessingMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub file_id: i64,
    pub file_path: String,
    pub operation: FileOperation,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub options: serde_json::Value,
}

impl FileProcessingMessage {
    pub fn new(file_id: i64, file_path: impl Into<String>, operation: FileOperation) -> Self {
        Self {
            envelope: Envelope::new(),
            file_id,
            file_path: file_path.into(),
            operation,
            user_id: None,
            options: serde_json::Value::Null,
        }
    }
}

broker_message!(FileProcessingMessage, "file_processing", |m| {
    routing::file_process(m.operation.as_str())
});

/// 通用领域事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEventMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub event_type: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl DomainEventMessage {
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            envelope: Envelope::new(),
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            payload,
        }
    }
}

broker_message!(DomainEventMessage, "domain_event", |m| routing::event(&m.event_type));

/// 用户注册事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRegisteredEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub user_id: i64,
    pub email: String,
    pub username: String,
}

impl UserRegisteredEvent {
    pub fn new(user_id: i64, email: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::new(),
            user_id,
            email: email.into(),
            username: username.into(),
        }
    }
}

broker_message!(UserRegisteredEvent, "user_registered", |_m| {
    routing::EVENT_USER_REGISTERED.to_string()
});

/// 用户登录事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLoggedInEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub user_id: i64,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl UserLoggedInEvent {
    pub fn new(user_id: i64) -> Self {
        Self {
            envelope: Envelope::new(),
            user_id,
            ip_address: None,
            user_agent: None,
        }
    }
}

broker_message!(UserLoggedInEvent, "user_logged_in", |_m| {
    routing::EVENT_USER_LOGGED_IN.to_string()
});

/// 审计结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    #[default]
    Success,
    Failure,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "success" => Ok(AuditOutcome::Success),
            "failure" => Ok(AuditOutcome::Failure),
            other => Err(TaskbusError::Internal(format!("无效的审计结果: {other}"))),
        }
    }
}

/// 审计日志条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default)]
    pub user_id: Option<i64>,
    pub action: String,
    pub resource_type: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub outcome: AuditOutcome,
}

impl AuditLogMessage {
    pub fn new(action: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::new(),
            user_id: None,
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: None,
            details: serde_json::Value::Null,
            ip_address: None,
            user_agent: None,
            outcome: AuditOutcome::Success,
        }
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

broker_message!(AuditLogMessage, "audit_log", |_m| routing::AUDIT_LOG.to_string());

/// 定时任务分发消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTaskMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub task_id: i64,
    pub task_name: String,
    pub task_type: String,
    pub execution_id: i64,
    #[serde(default)]
    pub context: serde_json::Value,
    pub triggered_by: TriggeredBy,
}

impl ScheduledTaskMessage {
    pub fn new(
        task_id: i64,
        task_name: impl Into<String>,
        task_type: impl Into<String>,
        execution_id: i64,
        context: serde_json::Value,
        triggered_by: TriggeredBy,
    ) -> Self {
        Self {
            envelope: Envelope::new(),
            task_id,
            task_name: task_name.into(),
            task_type: task_type.into(),
            execution_id,
            context,
            triggered_by,
        }
    }
}

broker_message!(ScheduledTaskMessage, "scheduled_task", |m| {
    routing::task_execute(&m.task_type)
});

use thiserror::Error;

/// 系统统一错误类型
#[derive(Debug, Error)]
pub enum TaskbusError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("消息序列化失败: {0}")]
    Serialization(String),

    #[error("消息反序列化失败: {0}")]
    Deserialization(String),

    #[error("消息发布失败: {0}")]
    Publish(String),

    #[error("消息代理尚未初始化")]
    BrokerNotInitialized,

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("消息 {message_id} 重试次数已耗尽 (retry_count={retry_count})")]
    RetriesExhausted { message_id: String, retry_count: u32 },

    #[error("熔断器 {name} 处于打开状态，调用被拒绝")]
    CircuitOpen { name: String },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("消费者 {0} 尚未启动")]
    ConsumerNotStarted(String),

    #[error("消费者 {0} 已在运行")]
    ConsumerAlreadyRunning(String),

    #[error("任务类型 {0} 的执行器已注册")]
    DuplicateExecutor(String),

    #[error("无效的执行器: {0}")]
    InvalidExecutor(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的调度配置: {0}")]
    InvalidSchedule(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("任务执行记录未找到: {id}")]
    TaskExecutionNotFound { id: i64 },

    #[error("非法的执行状态转换: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("邮件发送失败: {0}")]
    Email(String),

    #[error("消息处理失败: {0}")]
    Handler(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl TaskbusError {
    /// 按错误类型判断是否为瞬时错误
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskbusError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            TaskbusError::Publish(_)
            | TaskbusError::MessageQueue(_)
            | TaskbusError::Timeout(_)
            | TaskbusError::Network(_) => true,
            _ => false,
        }
    }

    /// 配置或编程错误，出现即说明启动流程有缺陷
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            TaskbusError::Configuration(_)
                | TaskbusError::ConsumerNotStarted(_)
                | TaskbusError::ConsumerAlreadyRunning(_)
                | TaskbusError::DuplicateExecutor(_)
                | TaskbusError::InvalidExecutor(_)
                | TaskbusError::BrokerNotInitialized
        )
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, TaskbusError>;

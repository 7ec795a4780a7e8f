use async_trait::async_trait;

use crate::models::BrokerMessage;
use crate::Result;

/// 单一消息类型的处理器
///
/// 处理器需要容忍重复投递：系统提供至少一次语义，重放副作用是可接受的。
/// 返回错误会触发重新发布重试，重试耗尽后进入死信队列。
#[async_trait]
pub trait MessageHandler<M: BrokerMessage>: Send + Sync {
    async fn handle(&self, message: M) -> Result<()>;
}

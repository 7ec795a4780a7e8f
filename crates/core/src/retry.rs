//! 通用重试工具
//!
//! `max_retries` 表示总尝试次数，第一次调用即为第1次尝试。
//! 不可重试的错误立即返回；最后一次尝试仍失败时原样返回该错误。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Result, TaskbusError};

/// 判定为瞬时错误的消息片段
const RETRYABLE_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection refused",
    "temporarily unavailable",
    "service unavailable",
    "connection reset",
    "network unreachable",
];

/// 抖动上限：计算出的延迟最多再增加10%
pub const MAX_JITTER_FACTOR: f64 = 0.1;

/// 退避策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Linear,
    Constant,
}

/// 重试策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 总尝试次数
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// 0.0-0.1，超过上限按上限处理
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter_factor: MAX_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// 第 `attempt` 次尝试失败后的基础延迟（不含抖动），已按 `max_delay` 截断
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.strategy {
            BackoffStrategy::Exponential => {
                let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.checked_mul(factor).unwrap_or(self.max_delay)
            }
            BackoffStrategy::Linear => self
                .base_delay
                .checked_mul(attempt)
                .unwrap_or(self.max_delay),
            BackoffStrategy::Constant => self.base_delay,
        };
        delay.min(self.max_delay)
    }

    /// 加入抖动后的实际延迟，仍不超过 `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        let factor = self.jitter_factor.clamp(0.0, MAX_JITTER_FACTOR);
        if factor == 0.0 {
            return delay;
        }
        let jitter = delay.mul_f64(factor * rand::random::<f64>());
        (delay + jitter).min(self.max_delay)
    }
}

/// 默认的可重试判定：错误类型或消息内容匹配瞬时错误
pub fn is_retryable_error(error: &TaskbusError) -> bool {
    error.is_retryable() || message_looks_transient(&error.to_string())
}

/// 按消息片段判断是否为瞬时错误
pub fn message_looks_transient(message: &str) -> bool {
    let message = message.to_lowercase();
    RETRYABLE_PATTERNS
        .iter()
        .any(|pattern| message.contains(pattern))
}

/// 使用默认判定重试异步操作
pub async fn retry_async<T, F, Fut>(policy: &RetryPolicy, operation_name: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_async_with(policy, operation_name, operation, is_retryable_error).await
}

/// 使用自定义判定重试异步操作
pub async fn retry_async_with<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
    is_retryable: P,
) -> std::result::Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_retries.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} 在第 {} 次尝试成功", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} 第 {}/{} 次尝试失败: {}，{}ms 后重试",
                    operation_name,
                    attempt,
                    max_attempts,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if attempt >= max_attempts {
                    warn!("{} 已尝试 {} 次仍失败: {}", operation_name, attempt, e);
                }
                return Err(e);
            }
        }
    }
}

/// 同步版本，使用线程休眠
pub fn retry_sync<T, F>(policy: &RetryPolicy, operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let max_attempts = policy.max_retries.max(1);
    let mut attempt = 1;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable_error(&e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} 第 {}/{} 次尝试失败: {}，{}ms 后重试",
                    operation_name,
                    attempt,
                    max_attempts,
                    e,
                    delay.as_millis()
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

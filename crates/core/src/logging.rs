use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{Result, TaskbusError};

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
    Compact,
}

impl FromStr for LogFormat {
    type Err = TaskbusError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(TaskbusError::Configuration(format!(
                "不支持的日志格式: {other}"
            ))),
        }
    }
}

/// 校验日志级别字符串
pub fn validate_log_level(level: &str) -> Result<()> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        other => Err(TaskbusError::Configuration(format!(
            "无效的日志级别: {other}"
        ))),
    }
}

/// 初始化进程级日志
///
/// `RUST_LOG` 存在时优先使用，否则使用传入的级别。每个进程只能调用一次。
pub fn init_logging(log_level: &str, log_format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let initialized = match log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
    };

    initialized.map_err(|e| TaskbusError::Configuration(format!("初始化日志失败: {e}")))
}

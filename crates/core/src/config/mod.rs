//! 配置管理
//!
//! 配置按以下顺序合并：内置默认值、TOML配置文件、`TASKBUS_` 前缀的环境变量。
//! 嵌套字段使用双下划线，例如 `TASKBUS_MESSAGE_QUEUE__ENABLED=false`。
//!
//! ```rust
//! use taskbus_core::config::AppConfig;
//!
//! let config = AppConfig::from_toml("[scheduler]\ncheck_interval_seconds = 30").unwrap();
//! assert_eq!(config.scheduler.check_interval_seconds, 30);
//! ```

pub mod models;

pub use models::*;

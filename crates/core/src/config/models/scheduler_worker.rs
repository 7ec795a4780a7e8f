use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// 轮询到期任务的间隔
    pub check_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("调度检查间隔必须大于0"));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 收到停止信号后等待消费者退出的最长时间
    pub shutdown_timeout_seconds: u64,
    pub email_prefetch: u16,
    pub event_prefetch: u16,
    pub file_prefetch: u16,
    pub audit_prefetch: u16,
    pub task_prefetch: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_seconds: 30,
            email_prefetch: 10,
            event_prefetch: 20,
            file_prefetch: 2,
            audit_prefetch: 50,
            task_prefetch: 1,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.shutdown_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("停机超时时间必须大于0"));
        }

        let prefetches = [
            self.email_prefetch,
            self.event_prefetch,
            self.file_prefetch,
            self.audit_prefetch,
            self.task_prefetch,
        ];
        if prefetches.iter().any(|count| *count == 0) {
            return Err(anyhow::anyhow!("消费者预取数量必须大于0"));
        }

        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

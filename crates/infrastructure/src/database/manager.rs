use sqlx::{postgres::PgPoolOptions, PgPool};
use taskbus_core::{
    config::DatabaseConfig,
    traits::{AuditLogRepository, ScheduledTaskRepository, TaskExecutionRepository},
    Result, TaskbusError,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::postgres::{
    PostgresAuditLogRepository, PostgresScheduledTaskRepository, PostgresTaskExecutionRepository,
};

/// 连接的最长存活时间
const MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// 数据库连接池管理器
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    /// 创建新的数据库管理器
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connection_timeout())
            .idle_timeout(config.idle_timeout())
            .max_lifetime(MAX_LIFETIME)
            .connect(&config.url)
            .await?;

        info!(
            "数据库连接池已创建 (max_connections={})",
            config.max_connections
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 获取数据库连接池
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 运行数据库迁移
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| TaskbusError::DatabaseOperation(format!("数据库迁移失败: {e}")))?;
        info!("数据库迁移完成");
        Ok(())
    }

    /// 检查数据库连接健康状态
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// 关闭数据库连接池
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn scheduled_task_repository(&self) -> Arc<dyn ScheduledTaskRepository> {
        Arc::new(PostgresScheduledTaskRepository::new(self.pool.clone()))
    }

    pub fn task_execution_repository(&self) -> Arc<dyn TaskExecutionRepository> {
        Arc::new(PostgresTaskExecutionRepository::new(self.pool.clone()))
    }

    /// 审计处理器持有自己的仓储实例，与其他处理器不共享会话
    pub fn audit_log_repository(&self) -> Arc<dyn AuditLogRepository> {
        Arc::new(PostgresAuditLogRepository::new(self.pool.clone()))
    }
}

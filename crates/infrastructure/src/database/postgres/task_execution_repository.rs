use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use taskbus_core::{
    models::{ExecutionStatus, TaskExecution, TriggeredBy},
    traits::TaskExecutionRepository,
    Result, TaskbusError,
};
use tracing::{debug, instrument};

const EXECUTION_COLUMNS: &str = "id, task_id, status, started_at, completed_at, duration_ms, \
     result, error, retry_count, triggered_by, created_at";

pub struct PostgresTaskExecutionRepository {
    pool: PgPool,
}

impl PostgresTaskExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_execution(row: &sqlx::postgres::PgRow) -> Result<TaskExecution> {
        let status: String = row.try_get("status")?;
        let triggered_by: String = row.try_get("triggered_by")?;
        Ok(TaskExecution {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            status: ExecutionStatus::parse(&status)?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            duration_ms: row.try_get("duration_ms")?,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            retry_count: row.try_get("retry_count")?,
            triggered_by: TriggeredBy::parse(&triggered_by)?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl TaskExecutionRepository for PostgresTaskExecutionRepository {
    #[instrument(skip(self, execution), fields(
        task_id = %execution.task_id,
        status = %execution.status.as_str(),
        triggered_by = %execution.triggered_by,
    ))]
    async fn create(&self, execution: &TaskExecution) -> Result<TaskExecution> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO task_executions (task_id, status, started_at, completed_at, duration_ms,
                result, error, retry_count, triggered_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(execution.task_id)
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .bind(&execution.result)
        .bind(&execution.error)
        .bind(execution.retry_count)
        .bind(execution.triggered_by.as_str())
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_execution(&row)?;
        debug!(
            "创建执行记录成功: ID {}, 任务ID: {}",
            created.id, created.task_id
        );
        Ok(created)
    }

    #[instrument(skip(self), fields(execution_id = %id))]
    async fn get_by_id(&self, id: i64) -> Result<Option<TaskExecution>> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM task_executions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_execution).transpose()
    }

    #[instrument(skip(self, execution), fields(
        execution_id = %execution.id,
        status = %execution.status.as_str(),
    ))]
    async fn update(&self, execution: &TaskExecution) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE task_executions
            SET status = $2, started_at = $3, completed_at = $4, duration_ms = $5,
                result = $6, error = $7, retry_count = $8
            WHERE id = $1
            "#,
        )
        .bind(execution.id)
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .bind(&execution.result)
        .bind(&execution.error)
        .bind(execution.retry_count)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TaskbusError::TaskExecutionNotFound { id: execution.id });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn list_by_task(&self, task_id: i64, limit: i64) -> Result<Vec<TaskExecution>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS} FROM task_executions
            WHERE task_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(task_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_execution).collect()
    }

    #[instrument(skip(self))]
    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM task_executions
            WHERE created_at < $1 AND status IN ('success', 'failed', 'cancelled')
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;

        debug!("清理了 {} 条过期执行记录", result.rows_affected());
        Ok(result.rows_affected())
    }
}

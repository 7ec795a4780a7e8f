use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use taskbus_core::{
    models::ScheduledTask, traits::ScheduledTaskRepository, Result, TaskbusError,
};
use tracing::{debug, instrument};

const TASK_COLUMNS: &str = "id, name, task_type, cron_expression, scheduled_at, timezone, \
     is_active, context, last_run_at, next_run_at, run_count, created_at, updated_at";

pub struct PostgresScheduledTaskRepository {
    pool: PgPool,
}

impl PostgresScheduledTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> Result<ScheduledTask> {
        Ok(ScheduledTask {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            task_type: row.try_get("task_type")?,
            cron_expression: row.try_get("cron_expression")?,
            scheduled_at: row.try_get("scheduled_at")?,
            timezone: row.try_get("timezone")?,
            is_active: row.try_get("is_active")?,
            context: row.try_get("context")?,
            last_run_at: row.try_get("last_run_at")?,
            next_run_at: row.try_get("next_run_at")?,
            run_count: row.try_get("run_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ScheduledTaskRepository for PostgresScheduledTaskRepository {
    #[instrument(skip(self, task), fields(task_name = %task.name, task_type = %task.task_type))]
    async fn create(&self, task: &ScheduledTask) -> Result<ScheduledTask> {
        task.validate_schedule()?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO scheduled_tasks (name, task_type, cron_expression, scheduled_at, timezone,
                is_active, context, next_run_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(&task.name)
        .bind(&task.task_type)
        .bind(&task.cron_expression)
        .bind(task.scheduled_at)
        .bind(&task.timezone)
        .bind(task.is_active)
        .bind(&task.context)
        .bind(task.next_run_at)
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_task(&row)?;
        debug!("创建定时任务成功: {} (ID: {})", created.name, created.id);
        Ok(created)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_by_id(&self, id: i64) -> Result<Option<ScheduledTask>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, task_name = %task.name))]
    async fn update(&self, task: &ScheduledTask) -> Result<()> {
        task.validate_schedule()?;

        let result = sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET name = $2, task_type = $3, cron_expression = $4, scheduled_at = $5, timezone = $6,
                is_active = $7, context = $8, last_run_at = $9, next_run_at = $10,
                run_count = $11, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(task.id)
        .bind(&task.name)
        .bind(&task.task_type)
        .bind(&task.cron_expression)
        .bind(task.scheduled_at)
        .bind(&task.timezone)
        .bind(task.is_active)
        .bind(&task.context)
        .bind(task.last_run_at)
        .bind(task.next_run_at)
        .bind(task.run_count)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TaskbusError::TaskNotFound { id: task.id });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM scheduled_tasks
            WHERE is_active = TRUE AND next_run_at IS NOT NULL AND next_run_at <= $1
            ORDER BY next_run_at ASC
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let tasks = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<Result<Vec<_>>>()?;
        debug!("查询到 {} 个到期任务", tasks.len());
        Ok(tasks)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn record_dispatch(
        &self,
        id: i64,
        dispatched_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET last_run_at = $2, next_run_at = $3, run_count = run_count + 1, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(dispatched_at)
        .bind(next_run_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TaskbusError::TaskNotFound { id });
        }
        Ok(())
    }
}

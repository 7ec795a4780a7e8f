use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use taskbus_core::{
    models::{AuditLogEntry, AuditOutcome},
    traits::AuditLogRepository,
    Result,
};
use tracing::{debug, instrument};

pub struct PostgresAuditLogRepository {
    pool: PgPool,
}

impl PostgresAuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<AuditLogEntry> {
        let outcome: String = row.try_get("outcome")?;
        Ok(AuditLogEntry {
            id: row.try_get("id")?,
            message_id: row.try_get("message_id")?,
            user_id: row.try_get("user_id")?,
            action: row.try_get("action")?,
            resource_type: row.try_get("resource_type")?,
            resource_id: row.try_get("resource_id")?,
            details: row.try_get("details")?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            outcome: AuditOutcome::parse(&outcome)?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl AuditLogRepository for PostgresAuditLogRepository {
    #[instrument(skip(self, entry), fields(action = %entry.action, message_id = %entry.message_id))]
    async fn insert(&self, entry: &AuditLogEntry) -> Result<AuditLogEntry> {
        let row = sqlx::query(
            r#"
            INSERT INTO audit_logs (message_id, user_id, action, resource_type, resource_id,
                details, ip_address, user_agent, outcome, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id, message_id, user_id, action, resource_type, resource_id, details,
                ip_address, user_agent, outcome, created_at
            "#,
        )
        .bind(&entry.message_id)
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.details)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.outcome.as_str())
        .bind(entry.created_at)
        .fetch_one(&self.pool)
        .await?;

        let inserted = Self::row_to_entry(&row)?;
        debug!("写入审计日志: {} (ID: {})", inserted.action, inserted.id);
        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM audit_logs WHERE created_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;

        debug!("清理了 {} 条过期审计日志", result.rows_affected());
        Ok(result.rows_affected())
    }
}

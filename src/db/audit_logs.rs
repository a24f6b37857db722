use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::db::models::AuditEntry;

pub async fn record(
    pool: &PgPool,
    actor: &str,
    action: &str,
    target: &str,
    details: &serde_json::Value,
) -> Result<AuditEntry> {
    let entry = sqlx::query_as::<_, AuditEntry>(
        r#"
        INSERT INTO audit_logs (actor, action, target, details)
        VALUES ($1, $2, $3, $4)
        RETURNING id, actor, action, target, details, created_at
        "#,
    )
    .bind(actor)
    .bind(action)
    .bind(target)
    .bind(details)
    .fetch_one(pool)
    .await
    .context("Failed to write audit entry")?;

    Ok(entry)
}

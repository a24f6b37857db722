use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{ProvisioningRun, RunStatus};

const COLUMNS: &str = "id, tenant_id, status, last_error, retries, created_at, updated_at";

pub async fn create(pool: &PgPool, tenant_id: Uuid) -> Result<ProvisioningRun> {
    let run = sqlx::query_as::<_, ProvisioningRun>(&format!(
        r#"
        INSERT INTO provisioning_runs (tenant_id, status, retries)
        VALUES ($1, $2, 0)
        RETURNING {}
        "#,
        COLUMNS
    ))
    .bind(tenant_id)
    .bind(RunStatus::Queued)
    .fetch_one(pool)
    .await
    .context("Failed to create provisioning run")?;

    Ok(run)
}

/// Most recent run of a tenant
pub async fn latest_for_tenant(pool: &PgPool, tenant_id: Uuid) -> Result<Option<ProvisioningRun>> {
    let run = sqlx::query_as::<_, ProvisioningRun>(&format!(
        r#"
        SELECT {}
        FROM provisioning_runs
        WHERE tenant_id = $1
        ORDER BY created_at DESC
        LIMIT 1
        "#,
        COLUMNS
    ))
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
    .context("Failed to find latest provisioning run")?;

    Ok(run)
}

/// Set the status of a run. `last_error` replaces the stored value, failures bump `retries`.
pub async fn update_status(
    pool: &PgPool,
    id: Uuid,
    status: RunStatus,
    last_error: Option<&str>,
) -> Result<ProvisioningRun> {
    let run = sqlx::query_as::<_, ProvisioningRun>(&format!(
        r#"
        UPDATE provisioning_runs
        SET status = $2,
            last_error = $3,
            retries = retries + CASE WHEN $2 = 'failed' THEN 1 ELSE 0 END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        COLUMNS
    ))
    .bind(id)
    .bind(status)
    .bind(last_error)
    .fetch_one(pool)
    .await
    .context("Failed to update provisioning run")?;

    Ok(run)
}

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{Tenant, TenantStatus};

const COLUMNS: &str =
    "id, name, namespace, status, contact_email, note, created_at, updated_at";

/// List tenants, newest first (optionally filtered by status)
pub async fn list(pool: &PgPool, status: Option<TenantStatus>) -> Result<Vec<Tenant>> {
    let tenants = match status {
        Some(status) => {
            sqlx::query_as::<_, Tenant>(&format!(
                "SELECT {} FROM tenants WHERE status = $1 ORDER BY created_at DESC",
                COLUMNS
            ))
            .bind(status)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, Tenant>(&format!(
                "SELECT {} FROM tenants ORDER BY created_at DESC",
                COLUMNS
            ))
            .fetch_all(pool)
            .await
        }
    }
    .context("Failed to list tenants")?;

    Ok(tenants)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Tenant>> {
    let tenant = sqlx::query_as::<_, Tenant>(&format!(
        "SELECT {} FROM tenants WHERE id = $1",
        COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to find tenant by ID")?;

    Ok(tenant)
}

pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Tenant>> {
    let tenant = sqlx::query_as::<_, Tenant>(&format!(
        "SELECT {} FROM tenants WHERE name = $1",
        COLUMNS
    ))
    .bind(name)
    .fetch_optional(pool)
    .await
    .context("Failed to find tenant by name")?;

    Ok(tenant)
}

pub async fn namespace_taken(pool: &PgPool, namespace: &str) -> Result<bool> {
    let taken: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tenants WHERE namespace = $1)")
            .bind(namespace)
            .fetch_one(pool)
            .await
            .context("Failed to check namespace availability")?;

    Ok(taken)
}

/// Create a tenant in `pending` state
pub async fn create(
    pool: &PgPool,
    name: &str,
    namespace: &str,
    contact_email: &str,
    note: Option<&str>,
) -> Result<Tenant> {
    let tenant = sqlx::query_as::<_, Tenant>(&format!(
        r#"
        INSERT INTO tenants (name, namespace, status, contact_email, note)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {}
        "#,
        COLUMNS
    ))
    .bind(name)
    .bind(namespace)
    .bind(TenantStatus::Pending)
    .bind(contact_email)
    .bind(note)
    .fetch_one(pool)
    .await
    .context("Failed to create tenant")?;

    Ok(tenant)
}

pub async fn update_status(pool: &PgPool, id: Uuid, status: TenantStatus) -> Result<Tenant> {
    let tenant = sqlx::query_as::<_, Tenant>(&format!(
        r#"
        UPDATE tenants
        SET status = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        COLUMNS
    ))
    .bind(id)
    .bind(status)
    .fetch_one(pool)
    .await
    .context("Failed to update tenant status")?;

    Ok(tenant)
}

/// Delete a tenant together with its users and provisioning runs
pub async fn purge(pool: &PgPool, id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query("DELETE FROM users WHERE tenant_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete tenant users")?;
    sqlx::query("DELETE FROM provisioning_runs WHERE tenant_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete provisioning runs")?;
    sqlx::query("DELETE FROM tenants WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete tenant")?;

    tx.commit().await.context("Failed to commit tenant purge")?;
    Ok(())
}

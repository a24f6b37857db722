use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::User;
use crate::server::auth::PrincipalRole;

pub async fn create(
    pool: &PgPool,
    tenant_id: Uuid,
    email: &str,
    role: PrincipalRole,
) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (tenant_id, email, role)
        VALUES ($1, $2, $3)
        RETURNING id, tenant_id, email, role, created_at, updated_at
        "#,
    )
    .bind(tenant_id)
    .bind(email)
    .bind(role)
    .fetch_one(pool)
    .await
    .context("Failed to create user")?;

    Ok(user)
}

/// Change the role of every user of a tenant holding `from`; returns the number of rows changed
pub async fn promote_role(
    pool: &PgPool,
    tenant_id: Uuid,
    from: PrincipalRole,
    to: PrincipalRole,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET role = $3, updated_at = NOW()
        WHERE tenant_id = $1 AND role = $2
        "#,
    )
    .bind(tenant_id)
    .bind(from)
    .bind(to)
    .execute(pool)
    .await
    .context("Failed to update user roles")?;

    Ok(result.rows_affected())
}

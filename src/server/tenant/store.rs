use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{ProvisioningRun, RunStatus, Tenant, TenantStatus, User};
use crate::db::{audit_logs, provisioning_runs, tenants, users};
use crate::server::auth::PrincipalRole;

/// Persistence used by the onboarding flow.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>>;

    async fn find_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>>;

    async fn namespace_taken(&self, namespace: &str) -> Result<bool>;

    async fn list_tenants(&self, status: Option<TenantStatus>) -> Result<Vec<Tenant>>;

    async fn create_tenant(
        &self,
        name: &str,
        namespace: &str,
        contact_email: &str,
        note: Option<&str>,
    ) -> Result<Tenant>;

    async fn update_tenant_status(&self, id: Uuid, status: TenantStatus) -> Result<Tenant>;

    /// Remove a tenant and every row that depends on it.
    async fn purge_tenant(&self, id: Uuid) -> Result<()>;

    async fn create_user(&self, tenant_id: Uuid, email: &str, role: PrincipalRole) -> Result<User>;

    async fn promote_users(
        &self,
        tenant_id: Uuid,
        from: PrincipalRole,
        to: PrincipalRole,
    ) -> Result<u64>;

    async fn create_run(&self, tenant_id: Uuid) -> Result<ProvisioningRun>;

    async fn latest_run(&self, tenant_id: Uuid) -> Result<Option<ProvisioningRun>>;

    /// Failed updates also count towards `retries`.
    async fn update_run(
        &self,
        id: Uuid,
        status: RunStatus,
        last_error: Option<&str>,
    ) -> Result<ProvisioningRun>;

    async fn audit(
        &self,
        actor: &str,
        action: &str,
        target: &str,
        details: serde_json::Value,
    ) -> Result<()>;
}

/// [`TenantStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>> {
        tenants::find_by_id(&self.pool, id).await
    }

    async fn find_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>> {
        tenants::find_by_name(&self.pool, name).await
    }

    async fn namespace_taken(&self, namespace: &str) -> Result<bool> {
        tenants::namespace_taken(&self.pool, namespace).await
    }

    async fn list_tenants(&self, status: Option<TenantStatus>) -> Result<Vec<Tenant>> {
        tenants::list(&self.pool, status).await
    }

    async fn create_tenant(
        &self,
        name: &str,
        namespace: &str,
        contact_email: &str,
        note: Option<&str>,
    ) -> Result<Tenant> {
        tenants::create(&self.pool, name, namespace, contact_email, note).await
    }

    async fn update_tenant_status(&self, id: Uuid, status: TenantStatus) -> Result<Tenant> {
        tenants::update_status(&self.pool, id, status).await
    }

    async fn purge_tenant(&self, id: Uuid) -> Result<()> {
        tenants::purge(&self.pool, id).await
    }

    async fn create_user(&self, tenant_id: Uuid, email: &str, role: PrincipalRole) -> Result<User> {
        users::create(&self.pool, tenant_id, email, role).await
    }

    async fn promote_users(
        &self,
        tenant_id: Uuid,
        from: PrincipalRole,
        to: PrincipalRole,
    ) -> Result<u64> {
        users::promote_role(&self.pool, tenant_id, from, to).await
    }

    async fn create_run(&self, tenant_id: Uuid) -> Result<ProvisioningRun> {
        provisioning_runs::create(&self.pool, tenant_id).await
    }

    async fn latest_run(&self, tenant_id: Uuid) -> Result<Option<ProvisioningRun>> {
        provisioning_runs::latest_for_tenant(&self.pool, tenant_id).await
    }

    async fn update_run(
        &self,
        id: Uuid,
        status: RunStatus,
        last_error: Option<&str>,
    ) -> Result<ProvisioningRun> {
        provisioning_runs::update_status(&self.pool, id, status, last_error).await
    }

    async fn audit(
        &self,
        actor: &str,
        action: &str,
        target: &str,
        details: serde_json::Value,
    ) -> Result<()> {
        audit_logs::record(&self.pool, actor, action, target, &details).await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod memory {
    use std::sync::Mutex;

    use anyhow::{anyhow, bail};
    use chrono::Utc;

    use super::*;
    use crate::db::models::AuditEntry;

    #[derive(Default)]
    struct State {
        tenants: Vec<Tenant>,
        users: Vec<User>,
        runs: Vec<ProvisioningRun>,
        audit: Vec<AuditEntry>,
    }

    /// In-memory [`TenantStore`] with the same uniqueness rules as the database schema.
    #[derive(Default)]
    pub struct MemoryTenantStore {
        state: Mutex<State>,
    }

    impl MemoryTenantStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn audit_actions(&self) -> Vec<(String, String)> {
            self.state
                .lock()
                .unwrap()
                .audit
                .iter()
                .map(|e| (e.actor.clone(), e.action.clone()))
                .collect()
        }

        pub fn audit_entries(&self) -> Vec<AuditEntry> {
            self.state.lock().unwrap().audit.clone()
        }

        pub fn users_of(&self, tenant_id: Uuid) -> Vec<User> {
            self.state
                .lock()
                .unwrap()
                .users
                .iter()
                .filter(|u| u.tenant_id == tenant_id)
                .cloned()
                .collect()
        }

        pub fn run_count(&self) -> usize {
            self.state.lock().unwrap().runs.len()
        }
    }

    #[async_trait]
    impl TenantStore for MemoryTenantStore {
        async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>> {
            let state = self.state.lock().unwrap();
            Ok(state.tenants.iter().find(|t| t.id == id).cloned())
        }

        async fn find_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>> {
            let state = self.state.lock().unwrap();
            Ok(state.tenants.iter().find(|t| t.name == name).cloned())
        }

        async fn namespace_taken(&self, namespace: &str) -> Result<bool> {
            let state = self.state.lock().unwrap();
            Ok(state.tenants.iter().any(|t| t.namespace == namespace))
        }

        async fn list_tenants(&self, status: Option<TenantStatus>) -> Result<Vec<Tenant>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .tenants
                .iter()
                .rev()
                .filter(|t| status.map_or(true, |s| t.status == s))
                .cloned()
                .collect())
        }

        async fn create_tenant(
            &self,
            name: &str,
            namespace: &str,
            contact_email: &str,
            note: Option<&str>,
        ) -> Result<Tenant> {
            let mut state = self.state.lock().unwrap();
            if state
                .tenants
                .iter()
                .any(|t| t.name == name || t.namespace == namespace)
            {
                bail!("duplicate key value violates unique constraint");
            }
            let now = Utc::now();
            let tenant = Tenant {
                id: Uuid::new_v4(),
                name: name.to_string(),
                namespace: namespace.to_string(),
                status: TenantStatus::Pending,
                contact_email: contact_email.to_string(),
                note: note.map(str::to_string),
                created_at: now,
                updated_at: now,
            };
            state.tenants.push(tenant.clone());
            Ok(tenant)
        }

        async fn update_tenant_status(&self, id: Uuid, status: TenantStatus) -> Result<Tenant> {
            let mut state = self.state.lock().unwrap();
            let tenant = state
                .tenants
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| anyhow!("no rows returned"))?;
            tenant.status = status;
            tenant.updated_at = Utc::now();
            Ok(tenant.clone())
        }

        async fn purge_tenant(&self, id: Uuid) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.users.retain(|u| u.tenant_id != id);
            state.runs.retain(|r| r.tenant_id != id);
            state.tenants.retain(|t| t.id != id);
            Ok(())
        }

        async fn create_user(
            &self,
            tenant_id: Uuid,
            email: &str,
            role: PrincipalRole,
        ) -> Result<User> {
            let mut state = self.state.lock().unwrap();
            let now = Utc::now();
            let user = User {
                id: Uuid::new_v4(),
                tenant_id,
                email: email.to_string(),
                role,
                created_at: now,
                updated_at: now,
            };
            state.users.push(user.clone());
            Ok(user)
        }

        async fn promote_users(
            &self,
            tenant_id: Uuid,
            from: PrincipalRole,
            to: PrincipalRole,
        ) -> Result<u64> {
            let mut state = self.state.lock().unwrap();
            let mut changed = 0;
            for user in state
                .users
                .iter_mut()
                .filter(|u| u.tenant_id == tenant_id && u.role == from)
            {
                user.role = to;
                changed += 1;
            }
            Ok(changed)
        }

        async fn create_run(&self, tenant_id: Uuid) -> Result<ProvisioningRun> {
            let mut state = self.state.lock().unwrap();
            let now = Utc::now();
            let run = ProvisioningRun {
                id: Uuid::new_v4(),
                tenant_id,
                status: RunStatus::Queued,
                last_error: None,
                retries: 0,
                created_at: now,
                updated_at: now,
            };
            state.runs.push(run.clone());
            Ok(run)
        }

        async fn latest_run(&self, tenant_id: Uuid) -> Result<Option<ProvisioningRun>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .runs
                .iter()
                .rev()
                .find(|r| r.tenant_id == tenant_id)
                .cloned())
        }

        async fn update_run(
            &self,
            id: Uuid,
            status: RunStatus,
            last_error: Option<&str>,
        ) -> Result<ProvisioningRun> {
            let mut state = self.state.lock().unwrap();
            let run = state
                .runs
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| anyhow!("no rows returned"))?;
            run.status = status;
            run.last_error = last_error.map(str::to_string);
            if status == RunStatus::Failed {
                run.retries += 1;
            }
            run.updated_at = Utc::now();
            Ok(run.clone())
        }

        async fn audit(
            &self,
            actor: &str,
            action: &str,
            target: &str,
            details: serde_json::Value,
        ) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.audit.push(AuditEntry {
                id: Uuid::new_v4(),
                actor: actor.to_string(),
                action: action.to_string(),
                target: target.to_string(),
                details,
                created_at: Utc::now(),
            });
            Ok(())
        }
    }
}

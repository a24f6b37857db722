//! Tenant onboarding: registration, the approval decision and the provisioning that follows it.
//!
//! Approval only records a queued provisioning run and hands the actual namespace setup to a
//! background task, so the administrator's request returns immediately. The task writes its
//! outcome back to the run row and the audit log; a failed run stays failed until an
//! administrator asks for a reprovision.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::models::{RegisterRequest, RegisterResponse, TenantOverview};
use super::notify::{Notification, Notifier};
use super::provisioner::{ProvisioningSummary, TenantProvisioner};
use super::TenantError;
use crate::db::models::{RunStatus, Tenant, TenantStatus};
use crate::server::auth::{AccessContext, PrincipalRole};
use crate::server::tenant::store::TenantStore;
use crate::server::workload::models::is_dns_label;

const SYSTEM_ACTOR: &str = "system";

fn audit_target(tenant_id: Uuid) -> String {
    format!("tenant:{}", tenant_id)
}

/// Lowercase the input and collapse everything but ASCII letters and digits into single dashes.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    for c in input.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[derive(Clone)]
pub struct OnboardingService {
    store: Arc<dyn TenantStore>,
    provisioner: Arc<TenantProvisioner>,
    notifier: Arc<dyn Notifier>,
    namespace_prefix: String,
    provisioning_timeout: Duration,
}

impl OnboardingService {
    pub fn new(
        store: Arc<dyn TenantStore>,
        provisioner: Arc<TenantProvisioner>,
        notifier: Arc<dyn Notifier>,
        namespace_prefix: impl Into<String>,
        provisioning_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provisioner,
            notifier,
            namespace_prefix: namespace_prefix.into(),
            provisioning_timeout,
        }
    }

    /// Namespace for a new tenant: the requested one when it is a valid DNS label, otherwise
    /// `<prefix><slug>`.
    fn namespace_for(&self, company: &str, requested: Option<&str>) -> Result<String, TenantError> {
        if let Some(requested) = requested.map(str::trim).filter(|ns| is_dns_label(ns)) {
            return Ok(requested.to_string());
        }

        let budget = 63usize.saturating_sub(self.namespace_prefix.len());
        let slug = slugify(company);
        let slug = slug
            .get(..budget.min(slug.len()))
            .unwrap_or_default()
            .trim_end_matches('-');
        let namespace = format!("{}{}", self.namespace_prefix, slug);
        if slug.is_empty() || !is_dns_label(&namespace) {
            return Err(TenantError::Validation(format!(
                "cannot derive a namespace from company name '{}'",
                company
            )));
        }
        Ok(namespace)
    }

    async fn require_tenant(&self, id: Uuid) -> Result<Tenant, TenantError> {
        self.store
            .find_tenant(id)
            .await?
            .ok_or(TenantError::NotFound(id))
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse, TenantError> {
        let company = request.company.trim();
        if company.is_empty() {
            return Err(TenantError::Validation("company must not be empty".to_string()));
        }
        let email = request.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(TenantError::Validation(format!(
                "'{}' is not a valid email address",
                email
            )));
        }

        if let Some(existing) = self.store.find_tenant_by_name(company).await? {
            if existing.status != TenantStatus::Rejected {
                return Err(TenantError::Conflict(format!(
                    "tenant '{}' already exists",
                    company
                )));
            }
            info!(tenant_id = %existing.id, name = %company, "Purging rejected tenant before re-registration");
            self.store.purge_tenant(existing.id).await?;
        }

        let namespace = self.namespace_for(company, request.namespace.as_deref())?;
        if self.store.namespace_taken(&namespace).await? {
            return Err(TenantError::Conflict(format!(
                "namespace '{}' is already taken",
                namespace
            )));
        }

        let note = request.note.as_deref().map(str::trim).filter(|n| !n.is_empty());
        let tenant = self
            .store
            .create_tenant(company, &namespace, email, note)
            .await?;
        let user = self
            .store
            .create_user(tenant.id, email, PrincipalRole::PendingUser)
            .await?;
        self.store
            .audit(
                email,
                "register",
                &audit_target(tenant.id),
                json!({ "name": tenant.name, "namespace": tenant.namespace }),
            )
            .await?;

        info!(tenant_id = %tenant.id, name = %tenant.name, namespace = %tenant.namespace, "Registered tenant");
        self.notifier
            .notify(&Notification::TenantRegistered {
                tenant_id: tenant.id,
                name: tenant.name.clone(),
                namespace: tenant.namespace.clone(),
                contact_email: tenant.contact_email.clone(),
            })
            .await;

        Ok(RegisterResponse { tenant, user })
    }

    /// Activate a tenant and start provisioning its namespace in the background.
    pub async fn approve(&self, id: Uuid, actor: &str) -> Result<TenantOverview, TenantError> {
        let tenant = self.require_tenant(id).await?;
        match tenant.status {
            TenantStatus::Active => {
                let provisioning = self.store.latest_run(id).await?;
                return Ok(TenantOverview {
                    tenant,
                    provisioning,
                });
            }
            TenantStatus::Rejected => {
                return Err(TenantError::Conflict(format!(
                    "tenant '{}' was rejected and cannot be approved",
                    tenant.name
                )))
            }
            TenantStatus::Pending | TenantStatus::Suspended => {}
        }

        let tenant = self
            .store
            .update_tenant_status(id, TenantStatus::Active)
            .await?;
        let run = self.store.create_run(id).await?;
        self.store
            .audit(
                actor,
                "approve",
                &audit_target(id),
                json!({ "namespace": tenant.namespace, "run_id": run.id }),
            )
            .await?;

        info!(tenant_id = %id, namespace = %tenant.namespace, run_id = %run.id, "Approved tenant");
        self.notifier
            .notify(&Notification::TenantApproved {
                tenant_id: id,
                name: tenant.name.clone(),
                namespace: tenant.namespace.clone(),
            })
            .await;

        self.spawn_provisioning(tenant.clone(), run.id);
        Ok(TenantOverview {
            tenant,
            provisioning: Some(run),
        })
    }

    pub async fn reject(
        &self,
        id: Uuid,
        reason: Option<String>,
        actor: &str,
    ) -> Result<Tenant, TenantError> {
        let tenant = self.require_tenant(id).await?;
        match tenant.status {
            TenantStatus::Active => {
                return Err(TenantError::Conflict(format!(
                    "tenant '{}' is active and cannot be rejected",
                    tenant.name
                )))
            }
            TenantStatus::Rejected => return Ok(tenant),
            TenantStatus::Pending | TenantStatus::Suspended => {}
        }

        let tenant = self
            .store
            .update_tenant_status(id, TenantStatus::Rejected)
            .await?;

        let teardown = match self.provisioner.deprovision(&tenant.namespace).await {
            Ok(removed) => json!({ "namespace_removed": removed }),
            Err(e) => {
                warn!(tenant_id = %id, namespace = %tenant.namespace, error = %e, "Namespace teardown failed");
                json!({ "teardown_error": e.to_string() })
            }
        };
        self.store
            .audit(
                actor,
                "reject",
                &audit_target(id),
                json!({ "namespace": tenant.namespace, "reason": reason, "teardown": teardown }),
            )
            .await?;

        info!(tenant_id = %id, namespace = %tenant.namespace, "Rejected tenant");
        self.notifier
            .notify(&Notification::TenantRejected {
                tenant_id: id,
                name: tenant.name.clone(),
                namespace: tenant.namespace.clone(),
                reason,
            })
            .await;

        Ok(tenant)
    }

    pub async fn suspend(&self, id: Uuid, actor: &str) -> Result<Tenant, TenantError> {
        let tenant = self.require_tenant(id).await?;
        if tenant.status != TenantStatus::Active {
            return Err(TenantError::Conflict(format!(
                "only active tenants can be suspended, '{}' is {}",
                tenant.name, tenant.status
            )));
        }

        let tenant = self
            .store
            .update_tenant_status(id, TenantStatus::Suspended)
            .await?;
        self.store
            .audit(actor, "suspend", &audit_target(id), json!({ "namespace": tenant.namespace }))
            .await?;
        info!(tenant_id = %id, "Suspended tenant");
        Ok(tenant)
    }

    /// Queue another provisioning attempt after a failed one.
    pub async fn reprovision(&self, id: Uuid, actor: &str) -> Result<TenantOverview, TenantError> {
        let tenant = self.require_tenant(id).await?;
        if tenant.status != TenantStatus::Active {
            return Err(TenantError::Conflict(format!(
                "tenant '{}' is {}, only active tenants are provisioned",
                tenant.name, tenant.status
            )));
        }

        let run = match self.store.latest_run(id).await? {
            Some(run) if run.status != RunStatus::Failed => {
                return Err(TenantError::Conflict(format!(
                    "latest provisioning run is {}, nothing to retry",
                    run.status
                )))
            }
            Some(run) => {
                self.store
                    .update_run(run.id, RunStatus::Queued, run.last_error.as_deref())
                    .await?
            }
            None => self.store.create_run(id).await?,
        };
        self.store
            .audit(
                actor,
                "reprovision",
                &audit_target(id),
                json!({ "namespace": tenant.namespace, "run_id": run.id, "retries": run.retries }),
            )
            .await?;

        info!(tenant_id = %id, run_id = %run.id, retries = run.retries, "Queued reprovisioning");
        self.spawn_provisioning(tenant.clone(), run.id);
        Ok(TenantOverview {
            tenant,
            provisioning: Some(run),
        })
    }

    /// Tenant of the calling principal.
    pub async fn my_status(&self, ctx: &AccessContext) -> Result<TenantOverview, TenantError> {
        let tenant_id = ctx.tenant_id.ok_or(TenantError::Unbound)?;
        self.overview(tenant_id).await
    }

    pub async fn overview(&self, id: Uuid) -> Result<TenantOverview, TenantError> {
        let tenant = self.require_tenant(id).await?;
        let provisioning = self.store.latest_run(id).await?;
        Ok(TenantOverview {
            tenant,
            provisioning,
        })
    }

    pub async fn list(&self, status: Option<TenantStatus>) -> Result<Vec<Tenant>, TenantError> {
        Ok(self.store.list_tenants(status).await?)
    }

    fn spawn_provisioning(&self, tenant: Tenant, run_id: Uuid) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.run_provisioning(&tenant, run_id).await {
                error!(
                    tenant_id = %tenant.id,
                    run_id = %run_id,
                    error = ?e,
                    "Failed to record provisioning outcome"
                );
            }
        });
    }

    /// Provision the namespace under the configured timeout and record the outcome.
    pub async fn run_provisioning(&self, tenant: &Tenant, run_id: Uuid) -> anyhow::Result<()> {
        self.store
            .update_run(run_id, RunStatus::Running, None)
            .await?;

        let outcome: Result<ProvisioningSummary, String> = match tokio::time::timeout(
            self.provisioning_timeout,
            self.provisioner.provision(&tenant.namespace),
        )
        .await
        {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "provisioning timed out after {:?}",
                self.provisioning_timeout
            )),
        };

        let target = audit_target(tenant.id);
        match outcome {
            Ok(summary) => {
                self.store.update_run(run_id, RunStatus::Done, None).await?;
                self.store
                    .audit(SYSTEM_ACTOR, "provision", &target, serde_json::to_value(&summary)?)
                    .await?;
                let promoted = self
                    .store
                    .promote_users(tenant.id, PrincipalRole::PendingUser, PrincipalRole::TenantAdmin)
                    .await?;
                info!(
                    tenant_id = %tenant.id,
                    namespace = %tenant.namespace,
                    promoted_users = promoted,
                    "Tenant provisioning finished"
                );
                self.notifier
                    .notify(&Notification::ProvisioningSucceeded {
                        tenant_id: tenant.id,
                        namespace: tenant.namespace.clone(),
                        created: summary.created,
                    })
                    .await;
            }
            Err(message) => {
                warn!(
                    tenant_id = %tenant.id,
                    namespace = %tenant.namespace,
                    error = %message,
                    "Tenant provisioning failed"
                );
                let run = self
                    .store
                    .update_run(run_id, RunStatus::Failed, Some(&message))
                    .await?;
                self.store
                    .audit(
                        SYSTEM_ACTOR,
                        "provision_failed",
                        &target,
                        json!({ "namespace": tenant.namespace, "error": message, "retries": run.retries }),
                    )
                    .await?;
                self.notifier
                    .notify(&Notification::ProvisioningFailed {
                        tenant_id: tenant.id,
                        namespace: tenant.namespace.clone(),
                        error: message,
                    })
                    .await;
            }
        }
        Ok(())
    }
}

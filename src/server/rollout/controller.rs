use k8s_openapi::api::apps::v1::Deployment;
use serde::Serialize;
use tracing::info;

use super::lookup::{RoleLookup, RoleSet};
use super::state_machine::validate_transition;
use super::RolloutError;
use crate::server::cluster::labels::Role;
use crate::server::cluster::ClusterError;
use crate::server::workload::builder::{live_replicas, park, set_replicas, set_role};
use crate::server::workload::models::{ApplicationSpec, ComputeSummary};
use crate::server::workload::reconciler::{compute_summary, identify, RolePolicy};
use crate::server::workload::{WorkloadError, WorkloadReconciler};

#[derive(Debug, Clone, Serialize)]
pub struct PrepareOutcome {
    pub namespace: String,
    pub preview: ComputeSummary,
    /// Deployment still receiving traffic
    pub active: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RolloutOutcome {
    Promoted {
        active: String,
        replicas: i32,
        retired: Option<String>,
    },
    RolledBack {
        active: String,
        replicas: i32,
        demoted: String,
        demoted_role: Role,
    },
    NoAction {
        reason: String,
    },
}

/// Blue-green rollouts on top of the workload reconciler.
///
/// Traffic only ever follows the `role=active` label: the Service selector is pinned to it, so
/// every operation here is a relabel-and-scale of Deployments and never touches the Service.
#[derive(Clone)]
pub struct BlueGreenController {
    reconciler: WorkloadReconciler,
}

impl BlueGreenController {
    pub fn new(reconciler: WorkloadReconciler) -> Self {
        Self { reconciler }
    }

    async fn roles(&self, namespace: &str, app: &str) -> Result<RoleSet, RolloutError> {
        RoleLookup::new(self.reconciler.cluster().as_ref(), self.reconciler.builder().labels())
            .find(namespace, app)
            .await
    }

    /// `app` label of the application deployed under `name`.
    async fn app_of(&self, namespace: &str, name: &str) -> Result<String, RolloutError> {
        let identity = identify(self.reconciler.cluster().as_ref(), namespace, name).await?;
        Ok(identity.app)
    }

    /// Stage the spec as the preview Deployment of the application.
    ///
    /// The preview slot is `<name>-preview` unless that Deployment is currently active (after a
    /// promotion), in which case the retired `<name>` Deployment is reused.
    pub async fn prepare(
        &self,
        spec: &ApplicationSpec,
        namespace: &str,
    ) -> Result<PrepareOutcome, RolloutError> {
        spec.validate().map_err(WorkloadError::Validation)?;
        let roles = self.roles(namespace, spec.app_label()).await?;

        let preview_slot = spec.preview_name();
        let slot = if roles.active_name() == Some(preview_slot.as_str()) {
            spec.name.clone()
        } else {
            preview_slot
        };

        if let Some(existing) = roles.preview_name() {
            if existing != slot {
                return Err(RolloutError::Inconsistent {
                    app: spec.app_label().to_string(),
                    role: Role::Preview.to_string(),
                    names: vec![existing.to_string(), slot],
                });
            }
        }

        // Checked against every read inside the write loop, not the lookup above
        let applied = self
            .reconciler
            .reconcile_compute(spec, namespace, &slot, RolePolicy::Stage(Role::Preview))
            .await?;
        if let Some(role) = Role::of(&applied.object).filter(|r| *r != Role::Preview) {
            return Err(RolloutError::InvalidTransition {
                name: slot,
                from: role.to_string(),
                to: Role::Preview.to_string(),
            });
        }

        info!(
            namespace = %namespace,
            app = %spec.app_label(),
            preview = %slot,
            image = %spec.image_reference(),
            "Prepared preview deployment"
        );

        Ok(PrepareOutcome {
            namespace: namespace.to_string(),
            preview: compute_summary(&applied.object, applied.created),
            active: roles.active_name().map(str::to_string),
        })
    }

    /// Make the preview live and retire the previous active Deployment.
    ///
    /// Fails without touching anything when no preview exists.
    pub async fn promote(&self, name: &str, namespace: &str) -> Result<RolloutOutcome, RolloutError> {
        let app = self.app_of(namespace, name).await?;
        let app = app.as_str();
        let roles = self.roles(namespace, app).await?;
        let Some(preview) = roles.preview.as_ref() else {
            return Err(RolloutError::NothingToPromote {
                namespace: namespace.to_string(),
                app: app.to_string(),
            });
        };
        let preview_name = name_of(preview);
        let replicas = live_replicas(preview);

        validate_transition(&preview_name, Some(Role::Preview), Role::Active)?;
        if let Some(active) = roles.active.as_ref() {
            validate_transition(&name_of(active), Some(Role::Active), Role::Idle)?;
        }

        // Retire first so two Deployments never hold the active role at once
        let retired = match roles.active.as_ref() {
            Some(active) => {
                let name = name_of(active);
                self.retire(namespace, &name, Role::Idle).await?;
                Some(name)
            }
            None => None,
        };
        self.go_live(namespace, &preview_name, replicas).await?;

        info!(
            namespace = %namespace,
            app = %app,
            active = %preview_name,
            retired = ?retired,
            replicas,
            "Promoted preview deployment"
        );

        Ok(RolloutOutcome::Promoted {
            active: preview_name,
            replicas,
            retired,
        })
    }

    /// Swap the active Deployment with its counterpart, preferring the retired idle one.
    ///
    /// Reports [`RolloutOutcome::NoAction`] when there is nothing to swap with.
    pub async fn rollback(&self, name: &str, namespace: &str) -> Result<RolloutOutcome, RolloutError> {
        let app = self.app_of(namespace, name).await?;
        let app = app.as_str();
        let roles = self.roles(namespace, app).await?;
        let Some(active) = roles.active.as_ref() else {
            info!(namespace = %namespace, app = %app, "Rollback skipped, no active deployment");
            return Ok(RolloutOutcome::NoAction {
                reason: format!("application '{}' has no active deployment", app),
            });
        };
        let (counterpart, counterpart_role) = match (roles.idle.first(), roles.preview.as_ref()) {
            (Some(idle), _) => (idle, Role::Idle),
            (None, Some(preview)) => (preview, Role::Preview),
            (None, None) => {
                info!(namespace = %namespace, app = %app, "Rollback skipped, nothing to roll back to");
                return Ok(RolloutOutcome::NoAction {
                    reason: format!(
                        "application '{}' has no idle or preview deployment to roll back to",
                        app
                    ),
                });
            }
        };

        let active_name = name_of(active);
        let counterpart_name = name_of(counterpart);
        let replicas = live_replicas(counterpart);

        validate_transition(&counterpart_name, Some(counterpart_role), Role::Active)?;
        validate_transition(&active_name, Some(Role::Active), counterpart_role)?;

        self.retire(namespace, &active_name, counterpart_role).await?;
        self.go_live(namespace, &counterpart_name, replicas).await?;

        info!(
            namespace = %namespace,
            app = %app,
            active = %counterpart_name,
            demoted = %active_name,
            demoted_role = %counterpart_role,
            "Rolled back"
        );

        Ok(RolloutOutcome::RolledBack {
            active: counterpart_name,
            replicas,
            demoted: active_name,
            demoted_role: counterpart_role,
        })
    }

    async fn retire(&self, namespace: &str, name: &str, role: Role) -> Result<(), RolloutError> {
        self.mutate(namespace, name, &move |deployment: &mut Deployment| {
            let remembered = live_replicas(deployment);
            set_role(deployment, role);
            park(deployment, remembered);
        })
        .await
    }

    async fn go_live(&self, namespace: &str, name: &str, replicas: i32) -> Result<(), RolloutError> {
        self.mutate(namespace, name, &move |deployment: &mut Deployment| {
            set_role(deployment, Role::Active);
            set_replicas(deployment, replicas);
        })
        .await
    }

    /// Read-modify-write of one Deployment, re-reading on lost races.
    async fn mutate(
        &self,
        namespace: &str,
        name: &str,
        change: &(dyn Fn(&mut Deployment) + Send + Sync),
    ) -> Result<(), RolloutError> {
        let cluster = self.reconciler.cluster();
        self.reconciler
            .retry()
            .run("relabel deployment", move || async move {
                let mut deployment = cluster.get_deployment(namespace, name).await?.ok_or_else(|| {
                    ClusterError::NotFound {
                        kind: "deployment",
                        name: name.to_string(),
                    }
                })?;
                change(&mut deployment);
                cluster.replace_deployment(namespace, &deployment).await?;
                Ok::<(), ClusterError>(())
            })
            .await?;
        Ok(())
    }
}

fn name_of(deployment: &Deployment) -> String {
    deployment.metadata.name.clone().unwrap_or_default()
}

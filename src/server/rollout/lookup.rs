use k8s_openapi::api::apps::v1::Deployment;

use super::RolloutError;
use crate::server::cluster::labels::{PlatformLabels, Role};
use crate::server::cluster::ClusterApi;

/// Deployments of one application, grouped by role.
#[derive(Debug, Clone, Default)]
pub struct RoleSet {
    pub active: Option<Deployment>,
    pub preview: Option<Deployment>,
    /// Sorted by name
    pub idle: Vec<Deployment>,
}

impl RoleSet {
    pub fn active_name(&self) -> Option<&str> {
        self.active.as_ref().and_then(|d| d.metadata.name.as_deref())
    }

    pub fn preview_name(&self) -> Option<&str> {
        self.preview.as_ref().and_then(|d| d.metadata.name.as_deref())
    }
}

/// Finds the Deployments of an application by their labels rather than by stored names, so
/// externally recreated objects are picked up as long as they carry the labeling contract.
pub struct RoleLookup<'a> {
    cluster: &'a dyn ClusterApi,
    labels: &'a PlatformLabels,
}

impl<'a> RoleLookup<'a> {
    pub fn new(cluster: &'a dyn ClusterApi, labels: &'a PlatformLabels) -> Self {
        Self { cluster, labels }
    }

    pub async fn find(&self, namespace: &str, app: &str) -> Result<RoleSet, RolloutError> {
        let query = self.labels.app_query(app);
        let mut deployments = self.cluster.list_deployments(namespace, &query).await?;
        deployments.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

        let mut active = Vec::new();
        let mut preview = Vec::new();
        let mut idle = Vec::new();
        for deployment in deployments {
            match Role::of(&deployment) {
                Some(Role::Active) => active.push(deployment),
                Some(Role::Preview) => preview.push(deployment),
                Some(Role::Idle) => idle.push(deployment),
                None => tracing::debug!(
                    namespace = %namespace,
                    app = %app,
                    deployment = ?deployment.metadata.name,
                    "Ignoring deployment without a role label"
                ),
            }
        }

        Ok(RoleSet {
            active: single(app, Role::Active, active)?,
            preview: single(app, Role::Preview, preview)?,
            idle,
        })
    }
}

fn single(app: &str, role: Role, mut found: Vec<Deployment>) -> Result<Option<Deployment>, RolloutError> {
    if found.len() > 1 {
        return Err(RolloutError::Inconsistent {
            app: app.to_string(),
            role: role.to_string(),
            names: found
                .iter()
                .filter_map(|d| d.metadata.name.clone())
                .collect(),
        });
    }
    Ok(found.pop())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::cluster::fake::FakeCluster;
    use crate::server::workload::builder::{ResourceDefaults, WorkloadBuilder};
    use crate::server::workload::models::ApplicationSpec;

    const NS: &str = "tenant-acme";

    fn seed(cluster: &FakeCluster, name: &str, app: &str, role: Role) {
        let builder =
            WorkloadBuilder::new(PlatformLabels::new("hostplane"), ResourceDefaults::default());
        let mut spec = ApplicationSpec::new(app, "nginx");
        spec.app_label = Some(app.to_string());
        cluster.insert_deployment(NS, builder.deployment(&spec, NS, name, role));
    }

    #[tokio::test]
    async fn test_groups_by_role() {
        let cluster = FakeCluster::new();
        seed(&cluster, "web", "web", Role::Idle);
        seed(&cluster, "web-preview", "web", Role::Active);
        seed(&cluster, "api", "api", Role::Active);

        let labels = PlatformLabels::new("hostplane");
        let roles = RoleLookup::new(&cluster, &labels).find(NS, "web").await.unwrap();

        assert_eq!(roles.active_name(), Some("web-preview"));
        assert!(roles.preview.is_none());
        assert_eq!(roles.idle.len(), 1);
    }

    #[tokio::test]
    async fn test_ignores_other_platforms() {
        let cluster = FakeCluster::new();
        seed(&cluster, "web", "web", Role::Active);

        let labels = PlatformLabels::new("someone-else");
        let roles = RoleLookup::new(&cluster, &labels).find(NS, "web").await.unwrap();
        assert!(roles.active.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_active_is_inconsistent() {
        let cluster = FakeCluster::new();
        seed(&cluster, "web", "web", Role::Active);
        seed(&cluster, "web-preview", "web", Role::Active);

        let labels = PlatformLabels::new("hostplane");
        let err = RoleLookup::new(&cluster, &labels)
            .find(NS, "web")
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::Inconsistent { .. }));
    }
}

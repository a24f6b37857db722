use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::manifests::TenantManifests;
use crate::server::cluster::{ClusterApi, ClusterError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisioningSummary {
    pub namespace: String,
    /// `kind/name` of every object this run created
    pub created: Vec<String>,
    /// `kind/name` of every object that was already there
    pub existing: Vec<String>,
}

/// Creates and removes the isolated namespace of a tenant.
pub struct TenantProvisioner {
    cluster: Arc<dyn ClusterApi>,
    manifests: TenantManifests,
}

impl TenantProvisioner {
    pub fn new(cluster: Arc<dyn ClusterApi>, manifests: TenantManifests) -> Self {
        Self { cluster, manifests }
    }

    /// Create every missing object of the tenant bundle. Safe to run any number of times.
    pub async fn provision(&self, namespace: &str) -> Result<ProvisioningSummary, ClusterError> {
        let mut created = Vec::new();
        let mut existing = Vec::new();

        for object in self.manifests.bundle(namespace) {
            let item = object.display_ref();
            if self.cluster.tenant_object_exists(&object).await? {
                debug!(namespace = %namespace, object = %item, "Tenant object already exists");
                existing.push(item);
                continue;
            }
            match self.cluster.create_tenant_object(&object).await {
                Ok(()) => created.push(item),
                Err(ClusterError::AlreadyExists { .. }) => existing.push(item),
                Err(e) => return Err(e),
            }
        }

        info!(
            namespace = %namespace,
            created = created.len(),
            existing = existing.len(),
            "Provisioned tenant namespace"
        );

        Ok(ProvisioningSummary {
            namespace: namespace.to_string(),
            created,
            existing,
        })
    }

    /// Delete the tenant namespace. Returns `false` when it did not exist.
    pub async fn deprovision(&self, namespace: &str) -> Result<bool, ClusterError> {
        let removed = self.cluster.delete_namespace(namespace).await?;
        info!(namespace = %namespace, removed, "Deprovisioned tenant namespace");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::cluster::fake::FakeCluster;
    use crate::server::cluster::labels::PlatformLabels;
    use crate::server::cluster::{MockClusterApi, TenantObject};
    use crate::server::settings::{LimitRangeSettings, QuotaSettings};

    const NS: &str = "tenant-acme";

    fn manifests() -> TenantManifests {
        TenantManifests::new(
            PlatformLabels::new("hostplane"),
            QuotaSettings::default(),
            LimitRangeSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_provision_creates_full_bundle() {
        let cluster = Arc::new(FakeCluster::new());
        let provisioner = TenantProvisioner::new(cluster.clone(), manifests());

        let summary = provisioner.provision(NS).await.unwrap();

        assert_eq!(summary.created.len(), 7);
        assert!(summary.existing.is_empty());
        assert_eq!(summary.created[0], "namespace/tenant-acme");
        assert!(cluster.has_namespace(NS));
        assert_eq!(cluster.tenant_object_count(), 7);
    }

    #[tokio::test]
    async fn test_second_provision_creates_nothing() {
        let cluster = Arc::new(FakeCluster::new());
        let provisioner = TenantProvisioner::new(cluster.clone(), manifests());

        provisioner.provision(NS).await.unwrap();
        let creates_after_first = cluster.creates();
        let summary = provisioner.provision(NS).await.unwrap();

        assert!(summary.created.is_empty());
        assert_eq!(summary.existing.len(), 7);
        assert_eq!(cluster.creates(), creates_after_first);
    }

    #[tokio::test]
    async fn test_partial_bundle_is_completed() {
        let cluster = Arc::new(FakeCluster::new());
        let m = manifests();
        cluster
            .create_tenant_object(&TenantObject::Namespace(m.namespace(NS)))
            .await
            .unwrap();
        cluster
            .create_tenant_object(&TenantObject::ServiceAccount(m.service_account(NS)))
            .await
            .unwrap();

        let summary = TenantProvisioner::new(cluster.clone(), m)
            .provision(NS)
            .await
            .unwrap();

        assert_eq!(
            summary.existing,
            vec!["namespace/tenant-acme", "serviceaccount/tenant-admin"]
        );
        assert_eq!(summary.created.len(), 5);
    }

    #[tokio::test]
    async fn test_create_race_counts_as_existing() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_tenant_object_exists().returning(|_| Ok(false));
        cluster.expect_create_tenant_object().returning(|object| {
            if object.kind() == "role" {
                Err(ClusterError::AlreadyExists {
                    kind: "role",
                    name: object.name().to_string(),
                })
            } else {
                Ok(())
            }
        });

        let summary = TenantProvisioner::new(Arc::new(cluster), manifests())
            .provision(NS)
            .await
            .unwrap();

        assert_eq!(summary.existing, vec!["role/tenant-admin-role"]);
        assert_eq!(summary.created.len(), 6);
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.set_unavailable(true);

        let err = TenantProvisioner::new(cluster, manifests())
            .provision(NS)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Kube(_)));
    }

    #[tokio::test]
    async fn test_deprovision() {
        let cluster = Arc::new(FakeCluster::new());
        let provisioner = TenantProvisioner::new(cluster.clone(), manifests());
        provisioner.provision(NS).await.unwrap();

        assert!(provisioner.deprovision(NS).await.unwrap());
        assert!(!cluster.has_namespace(NS));
        assert_eq!(cluster.tenant_object_count(), 0);
        assert!(!provisioner.deprovision(NS).await.unwrap());
    }
}

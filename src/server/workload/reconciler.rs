use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::{debug, info, warn};

use super::builder::WorkloadBuilder;
use super::models::{
    preview_name, ApplicationSpec, ComputeSummary, NetworkSummary, TeardownResponse,
    UpsertResponse,
};
use super::WorkloadError;
use crate::server::cluster::labels::{Role, ANNOTATION_SERVICE_NAME, LABEL_APP};
use crate::server::cluster::retry::ConflictRetry;
use crate::server::cluster::{ClusterApi, ClusterError};

/// An object after reconciliation, and whether this call created it.
#[derive(Debug, Clone)]
pub struct Applied<T> {
    pub object: T,
    pub created: bool,
}

/// How the role label of a Deployment is chosen during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolePolicy {
    /// Use `on_create` for new Deployments, keep whatever role an existing one has
    Keep { on_create: Role },
    /// Force the role, on create and on update
    Assign(Role),
    /// Like `Assign`, but an existing Deployment that holds the active role is left untouched
    Stage(Role),
}

impl RolePolicy {
    fn resolve(&self, existing: Option<Role>) -> Role {
        match (self, existing) {
            (RolePolicy::Assign(role), _) | (RolePolicy::Stage(role), _) => *role,
            (RolePolicy::Keep { .. }, Some(role)) => role,
            (RolePolicy::Keep { on_create }, None) => *on_create,
        }
    }
}

/// The `app` label and Service an application name stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub app: String,
    pub service: String,
}

/// Resolve an application name through its Deployment (or its preview), so `appLabel` and
/// `serviceName` overrides given at deploy time are honored. Falls back to the name itself.
pub async fn identify(
    cluster: &dyn ClusterApi,
    namespace: &str,
    name: &str,
) -> Result<AppIdentity, ClusterError> {
    for candidate in [name.to_string(), preview_name(name)] {
        if let Some(deployment) = cluster.get_deployment(namespace, &candidate).await? {
            let meta = &deployment.metadata;
            let app = meta.labels.as_ref().and_then(|l| l.get(LABEL_APP));
            let service = meta
                .annotations
                .as_ref()
                .and_then(|a| a.get(ANNOTATION_SERVICE_NAME));
            return Ok(AppIdentity {
                app: app.cloned().unwrap_or_else(|| name.to_string()),
                service: service.cloned().unwrap_or_else(|| name.to_string()),
            });
        }
    }
    Ok(AppIdentity {
        app: name.to_string(),
        service: name.to_string(),
    })
}

/// Create-or-adopt reconciliation of an application's Deployment and Service.
#[derive(Clone)]
pub struct WorkloadReconciler {
    cluster: Arc<dyn ClusterApi>,
    builder: WorkloadBuilder,
    retry: ConflictRetry,
}

impl WorkloadReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>, builder: WorkloadBuilder, retry: ConflictRetry) -> Self {
        Self {
            cluster,
            builder,
            retry,
        }
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterApi> {
        &self.cluster
    }

    pub fn builder(&self) -> &WorkloadBuilder {
        &self.builder
    }

    pub fn retry(&self) -> &ConflictRetry {
        &self.retry
    }

    /// Reconcile the Deployment named after the application and its Service.
    pub async fn upsert_workload(
        &self,
        spec: &ApplicationSpec,
        namespace: &str,
    ) -> Result<UpsertResponse, WorkloadError> {
        spec.validate().map_err(WorkloadError::Validation)?;

        // A freshly created Deployment only goes live when nothing else holds the active role
        let on_create = if self.other_active_exists(spec, namespace).await? {
            Role::Idle
        } else {
            Role::Active
        };

        let compute = self
            .reconcile_compute(spec, namespace, &spec.name, RolePolicy::Keep { on_create })
            .await?;
        let network = self.reconcile_network(spec, namespace).await?;

        info!(
            namespace = %namespace,
            app = %spec.name,
            image = %spec.image_reference(),
            deployment_created = compute.created,
            service_created = network.created,
            "Reconciled workload"
        );

        Ok(UpsertResponse {
            namespace: namespace.to_string(),
            deployment: compute_summary(&compute.object, compute.created),
            service: network_summary(&network.object, network.created),
        })
    }

    async fn other_active_exists(
        &self,
        spec: &ApplicationSpec,
        namespace: &str,
    ) -> Result<bool, WorkloadError> {
        let query = self.builder.labels().app_query(spec.app_label());
        let deployments = self.cluster.list_deployments(namespace, &query).await?;
        Ok(deployments.iter().any(|d| {
            d.metadata.name.as_deref() != Some(spec.name.as_str())
                && Role::of(d) == Some(Role::Active)
        }))
    }

    /// Create or adopt one Deployment of the application, retrying lost write races.
    pub async fn reconcile_compute(
        &self,
        spec: &ApplicationSpec,
        namespace: &str,
        name: &str,
        policy: RolePolicy,
    ) -> Result<Applied<Deployment>, WorkloadError> {
        let applied = self
            .retry
            .run("reconcile deployment", move || {
                self.apply_compute(spec, namespace, name, policy)
            })
            .await?;
        Ok(applied)
    }

    async fn apply_compute(
        &self,
        spec: &ApplicationSpec,
        namespace: &str,
        name: &str,
        policy: RolePolicy,
    ) -> Result<Applied<Deployment>, ClusterError> {
        let existing = match self.cluster.get_deployment(namespace, name).await? {
            Some(existing) => existing,
            None => {
                let fresh = self
                    .builder
                    .deployment(spec, namespace, name, policy.resolve(None));
                match self.cluster.create_deployment(namespace, &fresh).await {
                    Ok(created) => {
                        return Ok(Applied {
                            object: created,
                            created: true,
                        })
                    }
                    Err(ClusterError::AlreadyExists { .. }) => {
                        debug!(namespace = %namespace, deployment = %name, "Deployment created concurrently, adopting it");
                        self.cluster
                            .get_deployment(namespace, name)
                            .await?
                            .ok_or_else(|| ClusterError::Conflict {
                                kind: "deployment",
                                name: name.to_string(),
                            })?
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let current = Role::of(&existing);
        if matches!(policy, RolePolicy::Stage(_)) && current == Some(Role::Active) {
            return Ok(Applied {
                object: existing,
                created: false,
            });
        }
        let role = policy.resolve(current);
        let desired = self.builder.adopt_deployment(existing.clone(), spec, role);
        if desired == existing {
            return Ok(Applied {
                object: existing,
                created: false,
            });
        }
        let replaced = self.cluster.replace_deployment(namespace, &desired).await?;
        Ok(Applied {
            object: replaced,
            created: false,
        })
    }

    /// Create or adopt the Service in front of the application.
    pub async fn reconcile_network(
        &self,
        spec: &ApplicationSpec,
        namespace: &str,
    ) -> Result<Applied<Service>, WorkloadError> {
        let applied = self
            .retry
            .run("reconcile service", move || self.apply_network(spec, namespace))
            .await?;
        Ok(applied)
    }

    async fn apply_network(
        &self,
        spec: &ApplicationSpec,
        namespace: &str,
    ) -> Result<Applied<Service>, ClusterError> {
        let name = spec.service_name();
        let existing = match self.cluster.get_service(namespace, name).await? {
            Some(existing) => existing,
            None => {
                let fresh = self.builder.service(spec, namespace);
                match self.cluster.create_service(namespace, &fresh).await {
                    Ok(created) => {
                        return Ok(Applied {
                            object: created,
                            created: true,
                        })
                    }
                    Err(ClusterError::AlreadyExists { .. }) => {
                        debug!(namespace = %namespace, service = %name, "Service created concurrently, adopting it");
                        self.cluster
                            .get_service(namespace, name)
                            .await?
                            .ok_or_else(|| ClusterError::Conflict {
                                kind: "service",
                                name: name.to_string(),
                            })?
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let desired = self.builder.adopt_service(existing.clone(), spec);
        if desired == existing {
            return Ok(Applied {
                object: existing,
                created: false,
            });
        }
        let replaced = self.cluster.replace_service(namespace, &desired).await?;
        Ok(Applied {
            object: replaced,
            created: false,
        })
    }

    /// Change only the replica count of a Deployment.
    pub async fn scale(
        &self,
        name: &str,
        namespace: &str,
        replicas: i32,
    ) -> Result<ComputeSummary, WorkloadError> {
        match self.cluster.scale_deployment(namespace, name, replicas).await {
            Ok(()) => {}
            Err(ClusterError::NotFound { .. }) => {
                return Err(WorkloadError::NotFound {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        }
        info!(namespace = %namespace, deployment = %name, replicas, "Scaled deployment");

        let deployment = self
            .cluster
            .get_deployment(namespace, name)
            .await?
            .ok_or_else(|| WorkloadError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        Ok(compute_summary(&deployment, false))
    }

    /// Delete every Deployment of the application and its Service.
    pub async fn teardown(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<TeardownResponse, WorkloadError> {
        let identity = identify(self.cluster.as_ref(), namespace, name).await?;
        let query = self.builder.labels().app_query(&identity.app);
        let mut targets: Vec<String> = self
            .cluster
            .list_deployments(namespace, &query)
            .await?
            .into_iter()
            .filter_map(|d| d.metadata.name)
            .collect();
        for fixed in [name.to_string(), preview_name(name)] {
            if !targets.contains(&fixed) {
                targets.push(fixed);
            }
        }

        let mut deleted_deployments = Vec::new();
        for target in targets {
            if self.cluster.delete_deployment(namespace, &target).await? {
                deleted_deployments.push(target);
            }
        }
        let deleted_service = if self.cluster.delete_service(namespace, &identity.service).await? {
            Some(identity.service.clone())
        } else {
            None
        };

        if deleted_deployments.is_empty() && deleted_service.is_none() {
            warn!(namespace = %namespace, app = %name, "Teardown found nothing to delete");
        } else {
            info!(
                namespace = %namespace,
                app = %identity.app,
                deployments = ?deleted_deployments,
                "Tore down application"
            );
        }

        Ok(TeardownResponse {
            namespace: namespace.to_string(),
            deleted_deployments,
            deleted_service,
        })
    }
}

pub fn compute_summary(deployment: &Deployment, created: bool) -> ComputeSummary {
    let image = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.clone());
    ComputeSummary {
        name: deployment.metadata.name.clone().unwrap_or_default(),
        role: Role::of(deployment).map(|r| r.to_string()),
        image,
        replicas: deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(0),
        created,
    }
}

pub fn network_summary(service: &Service, created: bool) -> NetworkSummary {
    let spec = service.spec.as_ref();
    let port = spec
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| {
            ports
                .iter()
                .find(|p| p.name.as_deref() == Some(super::builder::HTTP_PORT_NAME))
                .or_else(|| ports.first())
        });
    NetworkSummary {
        name: service.metadata.name.clone().unwrap_or_default(),
        service_type: spec.and_then(|s| s.type_.clone()),
        port: port.map(|p| p.port).unwrap_or(0),
        target_port: match port.and_then(|p| p.target_port.as_ref()) {
            Some(IntOrString::Int(p)) => *p,
            _ => 0,
        },
        node_port: port.and_then(|p| p.node_port),
        created,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::cluster::fake::{roles_of, FakeCluster};
    use crate::server::cluster::labels::PlatformLabels;
    use crate::server::cluster::MockClusterApi;
    use crate::server::workload::builder::ResourceDefaults;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use std::time::Duration;

    const NS: &str = "tenant-acme";

    fn reconciler(cluster: Arc<dyn ClusterApi>) -> WorkloadReconciler {
        WorkloadReconciler::new(
            cluster,
            WorkloadBuilder::new(PlatformLabels::new("hostplane"), ResourceDefaults::default()),
            ConflictRetry {
                max_attempts: 3,
                delay: Duration::from_millis(1),
            },
        )
    }

    fn web_spec() -> ApplicationSpec {
        let mut spec = ApplicationSpec::new("web", "registry.local/web");
        spec.port = Some(3000);
        spec.replicas = 2;
        spec
    }

    #[tokio::test]
    async fn test_upsert_creates_deployment_and_service() {
        let cluster = Arc::new(FakeCluster::new());
        let result = reconciler(cluster.clone())
            .upsert_workload(&web_spec(), NS)
            .await
            .unwrap();

        assert!(result.deployment.created);
        assert!(result.service.created);
        assert_eq!(result.deployment.role.as_deref(), Some("active"));
        assert_eq!(result.deployment.replicas, 2);
        assert_eq!(result.service.port, 3000);
        assert_eq!(result.service.target_port, 3000);
        assert!(cluster.deployment(NS, "web").is_some());
        assert!(cluster.service(NS, "web").is_some());
    }

    #[tokio::test]
    async fn test_upsert_twice_is_idempotent() {
        let cluster = Arc::new(FakeCluster::new());
        let r = reconciler(cluster.clone());
        r.upsert_workload(&web_spec(), NS).await.unwrap();
        let deployment_after_first = cluster.deployment(NS, "web").unwrap();
        let service_after_first = cluster.service(NS, "web").unwrap();
        let writes_after_first = cluster.writes();

        let second = r.upsert_workload(&web_spec(), NS).await.unwrap();

        assert!(!second.deployment.created);
        assert!(!second.service.created);
        assert_eq!(cluster.deployments(NS).len(), 1);
        assert_eq!(cluster.deployment(NS, "web").unwrap(), deployment_after_first);
        assert_eq!(cluster.service(NS, "web").unwrap(), service_after_first);
        assert_eq!(cluster.writes(), writes_after_first);
    }

    #[tokio::test]
    async fn test_upsert_updates_template_in_place() {
        let cluster = Arc::new(FakeCluster::new());
        let r = reconciler(cluster.clone());
        r.upsert_workload(&web_spec(), NS).await.unwrap();

        let mut v2 = web_spec();
        v2.tag = "v2".to_string();
        v2.replicas = 5;
        let result = r.upsert_workload(&v2, NS).await.unwrap();

        assert!(!result.deployment.created);
        assert_eq!(result.deployment.image.as_deref(), Some("registry.local/web:v2"));
        assert_eq!(result.deployment.replicas, 5);
        assert_eq!(cluster.deployments(NS).len(), 1);
    }

    #[tokio::test]
    async fn test_adoption_preserves_external_node_port() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.insert_service(
            NS,
            Service {
                metadata: ObjectMeta {
                    name: Some("web".to_string()),
                    labels: Some(BTreeMap::from([("owner".to_string(), "ops".to_string())])),
                    ..Default::default()
                },
                spec: Some(ServiceSpec {
                    type_: Some("NodePort".to_string()),
                    selector: Some(BTreeMap::from([("app".to_string(), "legacy".to_string())])),
                    ports: Some(vec![ServicePort {
                        name: Some("http".to_string()),
                        port: 80,
                        node_port: Some(31234),
                        target_port: Some(IntOrString::Int(80)),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );

        let result = reconciler(cluster.clone())
            .upsert_workload(&web_spec(), NS)
            .await
            .unwrap();

        assert!(!result.service.created);
        let service = cluster.service(NS, "web").unwrap();
        let spec = service.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.node_port, Some(31234));
        assert_eq!(port.port, 80);
        assert_eq!(port.target_port, Some(IntOrString::Int(3000)));
        assert_eq!(spec.selector.unwrap(), PlatformLabels::service_selector("web"));
        assert_eq!(
            service.metadata.labels.unwrap().get("owner"),
            Some(&"ops".to_string())
        );
    }

    #[tokio::test]
    async fn test_create_race_is_treated_as_success() {
        let cluster = Arc::new(FakeCluster::new());
        let spec = web_spec();
        let builder =
            WorkloadBuilder::new(PlatformLabels::new("hostplane"), ResourceDefaults::default());
        let mut winner = builder.deployment(&spec, NS, "web", Role::Active);
        winner.spec.as_mut().unwrap().replicas = Some(1);
        cluster.race_next_deployment_create(winner);

        let result = reconciler(cluster.clone())
            .upsert_workload(&spec, NS)
            .await
            .unwrap();

        assert!(!result.deployment.created);
        assert_eq!(result.deployment.replicas, 2);
        assert_eq!(cluster.deployments(NS).len(), 1);
    }

    #[tokio::test]
    async fn test_stale_write_is_retried() {
        let cluster = Arc::new(FakeCluster::new());
        let r = reconciler(cluster.clone());
        r.upsert_workload(&web_spec(), NS).await.unwrap();

        cluster.fail_next_replaces(2);
        let mut v2 = web_spec();
        v2.tag = "v2".to_string();
        let result = r.upsert_workload(&v2, NS).await.unwrap();
        assert_eq!(result.deployment.image.as_deref(), Some("registry.local/web:v2"));
    }

    #[tokio::test]
    async fn test_persistent_conflict_surfaces_after_bounded_attempts() {
        let cluster = Arc::new(FakeCluster::new());
        let r = reconciler(cluster.clone());
        r.upsert_workload(&web_spec(), NS).await.unwrap();

        cluster.fail_next_replaces(10);
        let mut v2 = web_spec();
        v2.tag = "v2".to_string();
        let err = r.upsert_workload(&v2, NS).await.unwrap_err();
        assert!(matches!(
            err,
            WorkloadError::Cluster(ClusterError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_upsert_keeps_idle_role_of_existing_deployment() {
        let cluster = Arc::new(FakeCluster::new());
        let spec = web_spec();
        let builder =
            WorkloadBuilder::new(PlatformLabels::new("hostplane"), ResourceDefaults::default());
        cluster.insert_deployment(NS, builder.deployment(&spec, NS, "web", Role::Idle));
        cluster.insert_deployment(NS, builder.deployment(&spec, NS, "web-preview", Role::Active));

        let result = reconciler(cluster.clone())
            .upsert_workload(&spec, NS)
            .await
            .unwrap();

        assert_eq!(result.deployment.role.as_deref(), Some("idle"));
        assert_eq!(result.deployment.replicas, 0);
        let roles = roles_of(&cluster.deployments(NS));
        assert_eq!(roles.get("active").map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_upsert_does_not_create_a_second_active() {
        let cluster = Arc::new(FakeCluster::new());
        let spec = web_spec();
        let builder =
            WorkloadBuilder::new(PlatformLabels::new("hostplane"), ResourceDefaults::default());
        cluster.insert_deployment(NS, builder.deployment(&spec, NS, "web-preview", Role::Active));

        let result = reconciler(cluster.clone())
            .upsert_workload(&spec, NS)
            .await
            .unwrap();

        assert!(result.deployment.created);
        assert_eq!(result.deployment.role.as_deref(), Some("idle"));
    }

    #[tokio::test]
    async fn test_invalid_spec_makes_no_backend_call() {
        let mock = MockClusterApi::new();
        let mut spec = web_spec();
        spec.replicas = 0;
        let err = reconciler(Arc::new(mock))
            .upsert_workload(&spec, NS)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkloadError::Validation(_)));
    }

    #[tokio::test]
    async fn test_backend_errors_propagate_unchanged() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.set_unavailable(true);
        let err = reconciler(cluster)
            .upsert_workload(&web_spec(), NS)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkloadError::Cluster(ClusterError::Kube(_))));
    }

    #[tokio::test]
    async fn test_scale_changes_only_replicas() {
        let cluster = Arc::new(FakeCluster::new());
        let r = reconciler(cluster.clone());
        r.upsert_workload(&web_spec(), NS).await.unwrap();
        let before = cluster.deployment(NS, "web").unwrap();

        let summary = r.scale("web", NS, 7).await.unwrap();

        assert_eq!(summary.replicas, 7);
        let after = cluster.deployment(NS, "web").unwrap();
        assert_eq!(after.metadata.labels, before.metadata.labels);
        assert_eq!(
            after.spec.as_ref().unwrap().template,
            before.spec.as_ref().unwrap().template
        );
    }

    #[tokio::test]
    async fn test_scale_missing_deployment_is_not_found() {
        let cluster = Arc::new(FakeCluster::new());
        let err = reconciler(cluster).scale("ghost", NS, 1).await.unwrap_err();
        assert!(matches!(err, WorkloadError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_teardown_removes_all_roles_and_service() {
        let cluster = Arc::new(FakeCluster::new());
        let spec = web_spec();
        let r = reconciler(cluster.clone());
        r.upsert_workload(&spec, NS).await.unwrap();
        r.reconcile_compute(&spec, NS, "web-preview", RolePolicy::Assign(Role::Preview))
            .await
            .unwrap();

        let result = r.teardown("web", NS).await.unwrap();

        assert_eq!(result.deleted_deployments.len(), 2);
        assert_eq!(result.deleted_service.as_deref(), Some("web"));
        assert!(cluster.deployments(NS).is_empty());

        let again = r.teardown("web", NS).await.unwrap();
        assert!(again.deleted_deployments.is_empty());
        assert!(again.deleted_service.is_none());
    }

    #[tokio::test]
    async fn test_teardown_follows_label_and_service_overrides() {
        let cluster = Arc::new(FakeCluster::new());
        let mut spec = web_spec();
        spec.app_label = Some("frontend".to_string());
        spec.service_name = Some("frontend-svc".to_string());
        let r = reconciler(cluster.clone());
        r.upsert_workload(&spec, NS).await.unwrap();
        r.reconcile_compute(&spec, NS, "web-preview", RolePolicy::Assign(Role::Preview))
            .await
            .unwrap();

        let identity = identify(cluster.as_ref(), NS, "web").await.unwrap();
        assert_eq!(
            identity,
            AppIdentity {
                app: "frontend".to_string(),
                service: "frontend-svc".to_string(),
            }
        );

        let result = r.teardown("web", NS).await.unwrap();
        assert_eq!(result.deleted_deployments.len(), 2);
        assert_eq!(result.deleted_service.as_deref(), Some("frontend-svc"));
        assert!(cluster.deployments(NS).is_empty());
        assert!(cluster.service(NS, "frontend-svc").is_none());
    }

    #[tokio::test]
    async fn test_identify_unknown_name_falls_back_to_name() {
        let cluster = Arc::new(FakeCluster::new());
        let identity = identify(cluster.as_ref(), NS, "ghost").await.unwrap();
        assert_eq!(identity.app, "ghost");
        assert_eq!(identity.service, "ghost");
    }
}

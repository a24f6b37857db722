use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v1::{Scale, ScaleSpec};
use k8s_openapi::api::core::v1::{LimitRange, Namespace, ResourceQuota, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{ClusterApi, ClusterError, TenantObject};

/// [`ClusterApi`] backed by a live Kubernetes API server.
///
/// Every call is bounded by `timeout`; an expired call yields [`ClusterError::Timeout`].
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
    timeout: Duration,
}

impl KubeCluster {
    pub fn new(client: kube::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Connect using the ambient configuration (in-cluster service account or kubeconfig).
    pub async fn try_default(timeout: Duration) -> anyhow::Result<Self> {
        let client = kube::Client::try_default().await?;
        Ok(Self::new(client, timeout))
    }

    async fn bounded<T, F>(&self, operation: String, fut: F) -> Result<T, ClusterError>
    where
        F: Future<Output = Result<T, ClusterError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn namespaced<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace.unwrap_or("default"))
    }
}

async fn get_opt<K>(api: &Api<K>, kind: &'static str, name: &str) -> Result<Option<K>, ClusterError>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(ClusterError::from_kube(kind, name, e)),
    }
}

async fn create<K>(api: &Api<K>, kind: &'static str, name: &str, obj: &K) -> Result<K, ClusterError>
where
    K: Clone + DeserializeOwned + Serialize + Debug,
{
    api.create(&PostParams::default(), obj)
        .await
        .map_err(|e| ClusterError::from_kube(kind, name, e))
}

async fn replace<K>(api: &Api<K>, kind: &'static str, name: &str, obj: &K) -> Result<K, ClusterError>
where
    K: Clone + DeserializeOwned + Serialize + Debug,
{
    api.replace(name, &PostParams::default(), obj)
        .await
        .map_err(|e| ClusterError::from_kube(kind, name, e))
}

async fn delete<K>(api: &Api<K>, kind: &'static str, name: &str) -> Result<bool, ClusterError>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
        Err(e) => Err(ClusterError::from_kube(kind, name, e)),
    }
}

fn object_name<K: kube::Resource>(obj: &K) -> String {
    obj.meta().name.clone().unwrap_or_default()
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ClusterError> {
        let api = self.deployments(namespace);
        self.bounded(
            format!("get deployment {}/{}", namespace, name),
            get_opt(&api, "deployment", name),
        )
        .await
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Deployment>, ClusterError> {
        let api = self.deployments(namespace);
        let params = ListParams::default().labels(label_selector);
        self.bounded(format!("list deployments in {}", namespace), async {
            api.list(&params)
                .await
                .map(|list| list.items)
                .map_err(|e| ClusterError::from_kube("deployment", label_selector, e))
        })
        .await
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError> {
        let api = self.deployments(namespace);
        let name = object_name(deployment);
        debug!(namespace = %namespace, deployment = %name, "Creating deployment");
        self.bounded(
            format!("create deployment {}/{}", namespace, name),
            create(&api, "deployment", &name, deployment),
        )
        .await
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError> {
        let api = self.deployments(namespace);
        let name = object_name(deployment);
        debug!(namespace = %namespace, deployment = %name, "Replacing deployment");
        self.bounded(
            format!("replace deployment {}/{}", namespace, name),
            replace(&api, "deployment", &name, deployment),
        )
        .await
    }

    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        let api = self.deployments(namespace);
        let scale = Scale {
            spec: Some(ScaleSpec {
                replicas: Some(replicas),
            }),
            ..Default::default()
        };
        self.bounded(format!("scale deployment {}/{}", namespace, name), async {
            api.patch_scale(name, &PatchParams::default(), &Patch::Merge(&scale))
                .await
                .map(|_| ())
                .map_err(|e| ClusterError::from_kube("deployment", name, e))
        })
        .await
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let api = self.deployments(namespace);
        self.bounded(
            format!("delete deployment {}/{}", namespace, name),
            delete(&api, "deployment", name),
        )
        .await
    }

    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, ClusterError> {
        let api = self.services(namespace);
        self.bounded(
            format!("get service {}/{}", namespace, name),
            get_opt(&api, "service", name),
        )
        .await
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ClusterError> {
        let api = self.services(namespace);
        let name = object_name(service);
        debug!(namespace = %namespace, service = %name, "Creating service");
        self.bounded(
            format!("create service {}/{}", namespace, name),
            create(&api, "service", &name, service),
        )
        .await
    }

    async fn replace_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ClusterError> {
        let api = self.services(namespace);
        let name = object_name(service);
        debug!(namespace = %namespace, service = %name, "Replacing service");
        self.bounded(
            format!("replace service {}/{}", namespace, name),
            replace(&api, "service", &name, service),
        )
        .await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let api = self.services(namespace);
        self.bounded(
            format!("delete service {}/{}", namespace, name),
            delete(&api, "service", name),
        )
        .await
    }

    async fn tenant_object_exists(&self, object: &TenantObject) -> Result<bool, ClusterError> {
        let kind = object.kind();
        let name = object.name();
        let ns = object.namespace();
        let operation = format!("get {}", object.display_ref());
        let exists = async {
            let found = match object {
                TenantObject::Namespace(_) => {
                    get_opt(&Api::<Namespace>::all(self.client.clone()), kind, name)
                        .await?
                        .is_some()
                }
                TenantObject::ResourceQuota(_) => {
                    get_opt(&self.namespaced::<ResourceQuota>(ns), kind, name)
                        .await?
                        .is_some()
                }
                TenantObject::LimitRange(_) => {
                    get_opt(&self.namespaced::<LimitRange>(ns), kind, name)
                        .await?
                        .is_some()
                }
                TenantObject::NetworkPolicy(_) => {
                    get_opt(&self.namespaced::<NetworkPolicy>(ns), kind, name)
                        .await?
                        .is_some()
                }
                TenantObject::ServiceAccount(_) => {
                    get_opt(&self.namespaced::<ServiceAccount>(ns), kind, name)
                        .await?
                        .is_some()
                }
                TenantObject::Role(_) => get_opt(&self.namespaced::<Role>(ns), kind, name)
                    .await?
                    .is_some(),
                TenantObject::RoleBinding(_) => {
                    get_opt(&self.namespaced::<RoleBinding>(ns), kind, name)
                        .await?
                        .is_some()
                }
            };
            Ok::<_, ClusterError>(found)
        };
        self.bounded(operation, exists).await
    }

    async fn create_tenant_object(&self, object: &TenantObject) -> Result<(), ClusterError> {
        let kind = object.kind();
        let name = object.name();
        let ns = object.namespace();
        debug!(object = %object.display_ref(), "Creating tenant object");
        let operation = format!("create {}", object.display_ref());
        let created = async {
            match object {
                TenantObject::Namespace(o) => {
                    create(&Api::<Namespace>::all(self.client.clone()), kind, name, o).await?;
                }
                TenantObject::ResourceQuota(o) => {
                    create(&self.namespaced::<ResourceQuota>(ns), kind, name, o).await?;
                }
                TenantObject::LimitRange(o) => {
                    create(&self.namespaced::<LimitRange>(ns), kind, name, o).await?;
                }
                TenantObject::NetworkPolicy(o) => {
                    create(&self.namespaced::<NetworkPolicy>(ns), kind, name, o).await?;
                }
                TenantObject::ServiceAccount(o) => {
                    create(&self.namespaced::<ServiceAccount>(ns), kind, name, o).await?;
                }
                TenantObject::Role(o) => {
                    create(&self.namespaced::<Role>(ns), kind, name, o).await?;
                }
                TenantObject::RoleBinding(o) => {
                    create(&self.namespaced::<RoleBinding>(ns), kind, name, o).await?;
                }
            }
            Ok::<_, ClusterError>(())
        };
        self.bounded(operation, created).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        self.bounded(
            format!("delete namespace {}", name),
            delete(&api, "namespace", name),
        )
        .await
    }
}

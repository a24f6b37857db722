//! Typed access to the Kubernetes API.
//!
//! Everything the control plane does against the cluster goes through [`ClusterApi`]. Reads return
//! `Ok(None)` for missing objects so callers can branch to create without inspecting errors, and
//! every other failure is classified into a [`ClusterError`].

pub mod client;
#[cfg(test)]
pub mod fake;
pub mod labels;
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{LimitRange, Namespace, ResourceQuota, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};

#[cfg(test)]
use mockall::automock;

pub use client::KubeCluster;

/// Errors returned by the cluster client.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// Target object does not exist (only returned by writes, reads yield `None`)
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// A create raced with another writer
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// A write carried a stale resource version
    #[error("{kind} '{name}' was modified concurrently")]
    Conflict { kind: &'static str, name: String },

    #[error("cluster call '{operation}' timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Any other API or transport failure, passed through untouched
    #[error("cluster API error: {0}")]
    Kube(#[source] kube::Error),
}

impl ClusterError {
    /// Classify a kube error for an object of the given kind.
    pub fn from_kube(kind: &'static str, name: &str, err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound {
                kind,
                name: name.to_string(),
            },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists {
                    kind,
                    name: name.to_string(),
                }
            }
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                kind,
                name: name.to_string(),
            },
            _ => Self::Kube(err),
        }
    }

    /// Whether the caller may retry the same call later with a chance of success.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Conflict { .. })
    }
}

/// One object of the per-tenant provisioning bundle.
#[derive(Debug, Clone, PartialEq)]
pub enum TenantObject {
    Namespace(Namespace),
    ResourceQuota(ResourceQuota),
    LimitRange(LimitRange),
    NetworkPolicy(NetworkPolicy),
    ServiceAccount(ServiceAccount),
    Role(Role),
    RoleBinding(RoleBinding),
}

impl TenantObject {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Namespace(_) => "namespace",
            Self::ResourceQuota(_) => "resourcequota",
            Self::LimitRange(_) => "limitrange",
            Self::NetworkPolicy(_) => "networkpolicy",
            Self::ServiceAccount(_) => "serviceaccount",
            Self::Role(_) => "role",
            Self::RoleBinding(_) => "rolebinding",
        }
    }

    fn metadata(&self) -> &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
        match self {
            Self::Namespace(o) => &o.metadata,
            Self::ResourceQuota(o) => &o.metadata,
            Self::LimitRange(o) => &o.metadata,
            Self::NetworkPolicy(o) => &o.metadata,
            Self::ServiceAccount(o) => &o.metadata,
            Self::Role(o) => &o.metadata,
            Self::RoleBinding(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Namespace the object lives in, `None` for the cluster-scoped namespace object itself.
    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    /// `kind/name`, as reported in provisioning summaries.
    pub fn display_ref(&self) -> String {
        format!("{}/{}", self.kind(), self.name())
    }
}

/// Create/read/replace/delete primitives for the resource kinds the control plane manages.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ClusterError>;

    /// List Deployments matching a label selector such as `managed-by=hostplane,app=web`.
    async fn list_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Deployment>, ClusterError>;

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError>;

    /// Write back a previously read Deployment.
    ///
    /// The object's `resourceVersion` is sent along, so a concurrent modification fails with
    /// [`ClusterError::Conflict`] instead of being overwritten.
    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError>;

    /// Set `spec.replicas` through the scale subresource, touching nothing else.
    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError>;

    /// Returns `false` when the Deployment did not exist.
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;

    async fn get_service(&self, namespace: &str, name: &str)
        -> Result<Option<Service>, ClusterError>;

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ClusterError>;

    /// Same optimistic concurrency contract as [`ClusterApi::replace_deployment`].
    async fn replace_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ClusterError>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;

    async fn tenant_object_exists(&self, object: &TenantObject) -> Result<bool, ClusterError>;

    async fn create_tenant_object(&self, object: &TenantObject) -> Result<(), ClusterError>;

    /// Delete a namespace and, by cascade, everything in it. Returns `false` when it was absent.
    async fn delete_namespace(&self, name: &str) -> Result<bool, ClusterError>;
}

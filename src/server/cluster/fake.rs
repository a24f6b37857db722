//! In-memory [`ClusterApi`] for tests.
//!
//! Keeps objects in maps, assigns resource versions on every write and enforces them on replace,
//! so optimistic concurrency behaves like a real API server.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::core::ErrorResponse;

use super::labels::matches_query;
use super::{ClusterApi, ClusterError, TenantObject};

type Key = (String, String);

#[derive(Default)]
struct State {
    deployments: BTreeMap<Key, Deployment>,
    services: BTreeMap<Key, Service>,
    tenant_objects: BTreeMap<(String, String, String), TenantObject>,
    next_version: u64,
    creates: u32,
    writes: u32,
    unavailable: bool,
    /// Inserted right before the next deployment create, which then reports AlreadyExists
    racing_deployment: Option<Deployment>,
    /// Remaining replace calls that fail with Conflict
    stale_replaces: u32,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn unavailable() -> ClusterError {
    ClusterError::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: "service unavailable".to_string(),
        reason: "ServiceUnavailable".to_string(),
        code: 503,
    }))
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object as if someone else had created it.
    pub fn insert_deployment(&self, namespace: &str, mut deployment: Deployment) {
        let mut state = self.state.lock().unwrap();
        deployment.metadata.namespace = Some(namespace.to_string());
        deployment.metadata.resource_version = Some(state.bump());
        let name = deployment.metadata.name.clone().unwrap_or_default();
        state.deployments.insert(key(namespace, &name), deployment);
    }

    pub fn insert_service(&self, namespace: &str, mut service: Service) {
        let mut state = self.state.lock().unwrap();
        service.metadata.namespace = Some(namespace.to_string());
        service.metadata.resource_version = Some(state.bump());
        let name = service.metadata.name.clone().unwrap_or_default();
        state.services.insert(key(namespace, &name), service);
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        let state = self.state.lock().unwrap();
        state.deployments.get(&key(namespace, name)).cloned()
    }

    pub fn deployments(&self, namespace: &str) -> Vec<Deployment> {
        let state = self.state.lock().unwrap();
        state
            .deployments
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, d)| d.clone())
            .collect()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        let state = self.state.lock().unwrap();
        state.services.get(&key(namespace, name)).cloned()
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .tenant_objects
            .contains_key(&("namespace".to_string(), String::new(), name.to_string()))
    }

    pub fn tenant_object_count(&self) -> usize {
        self.state.lock().unwrap().tenant_objects.len()
    }

    /// Number of successful create calls of any kind.
    pub fn creates(&self) -> u32 {
        self.state.lock().unwrap().creates
    }

    /// Number of successful mutating calls of any kind (create, replace, scale, delete).
    pub fn writes(&self) -> u32 {
        self.state.lock().unwrap().writes
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    pub fn race_next_deployment_create(&self, winner: Deployment) {
        self.state.lock().unwrap().racing_deployment = Some(winner);
    }

    pub fn fail_next_replaces(&self, count: u32) {
        self.state.lock().unwrap().stale_replaces = count;
    }

    fn check(&self) -> Result<std::sync::MutexGuard<'_, State>, ClusterError> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(unavailable());
        }
        Ok(state)
    }
}

fn tenant_key(object: &TenantObject) -> (String, String, String) {
    (
        object.kind().to_string(),
        object.namespace().unwrap_or_default().to_string(),
        object.name().to_string(),
    )
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ClusterError> {
        let state = self.check()?;
        Ok(state.deployments.get(&key(namespace, name)).cloned())
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Deployment>, ClusterError> {
        let state = self.check()?;
        Ok(state
            .deployments
            .iter()
            .filter(|((ns, _), d)| {
                ns == namespace && matches_query(d.metadata.labels.as_ref(), label_selector)
            })
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError> {
        let mut state = self.check()?;
        let name = deployment.metadata.name.clone().unwrap_or_default();
        if let Some(mut winner) = state.racing_deployment.take() {
            winner.metadata.namespace = Some(namespace.to_string());
            winner.metadata.resource_version = Some(state.bump());
            state.deployments.insert(key(namespace, &name), winner);
        }
        if state.deployments.contains_key(&key(namespace, &name)) {
            return Err(ClusterError::AlreadyExists {
                kind: "deployment",
                name,
            });
        }
        let mut stored = deployment.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(state.bump());
        state.deployments.insert(key(namespace, &name), stored.clone());
        state.creates += 1;
        state.writes += 1;
        Ok(stored)
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError> {
        let mut state = self.check()?;
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let current = state
            .deployments
            .get(&key(namespace, &name))
            .ok_or_else(|| ClusterError::NotFound {
                kind: "deployment",
                name: name.clone(),
            })?;
        if state.stale_replaces > 0
            || current.metadata.resource_version != deployment.metadata.resource_version
        {
            state.stale_replaces = state.stale_replaces.saturating_sub(1);
            return Err(ClusterError::Conflict {
                kind: "deployment",
                name,
            });
        }
        let mut stored = deployment.clone();
        stored.metadata.resource_version = Some(state.bump());
        state.deployments.insert(key(namespace, &name), stored.clone());
        state.writes += 1;
        Ok(stored)
    }

    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        let mut state = self.check()?;
        let version = state.bump();
        let deployment = state
            .deployments
            .get_mut(&key(namespace, name))
            .ok_or_else(|| ClusterError::NotFound {
                kind: "deployment",
                name: name.to_string(),
            })?;
        if let Some(spec) = deployment.spec.as_mut() {
            spec.replicas = Some(replicas);
        }
        deployment.metadata.resource_version = Some(version);
        state.writes += 1;
        Ok(())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let mut state = self.check()?;
        let removed = state.deployments.remove(&key(namespace, name)).is_some();
        if removed {
            state.writes += 1;
        }
        Ok(removed)
    }

    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, ClusterError> {
        let state = self.check()?;
        Ok(state.services.get(&key(namespace, name)).cloned())
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ClusterError> {
        let mut state = self.check()?;
        let name = service.metadata.name.clone().unwrap_or_default();
        if state.services.contains_key(&key(namespace, &name)) {
            return Err(ClusterError::AlreadyExists {
                kind: "service",
                name,
            });
        }
        let mut stored = service.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(state.bump());
        state.services.insert(key(namespace, &name), stored.clone());
        state.creates += 1;
        state.writes += 1;
        Ok(stored)
    }

    async fn replace_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ClusterError> {
        let mut state = self.check()?;
        let name = service.metadata.name.clone().unwrap_or_default();
        let current = state
            .services
            .get(&key(namespace, &name))
            .ok_or_else(|| ClusterError::NotFound {
                kind: "service",
                name: name.clone(),
            })?;
        if current.metadata.resource_version != service.metadata.resource_version {
            return Err(ClusterError::Conflict {
                kind: "service",
                name,
            });
        }
        let mut stored = service.clone();
        stored.metadata.resource_version = Some(state.bump());
        state.services.insert(key(namespace, &name), stored.clone());
        state.writes += 1;
        Ok(stored)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let mut state = self.check()?;
        let removed = state.services.remove(&key(namespace, name)).is_some();
        if removed {
            state.writes += 1;
        }
        Ok(removed)
    }

    async fn tenant_object_exists(&self, object: &TenantObject) -> Result<bool, ClusterError> {
        let state = self.check()?;
        Ok(state.tenant_objects.contains_key(&tenant_key(object)))
    }

    async fn create_tenant_object(&self, object: &TenantObject) -> Result<(), ClusterError> {
        let mut state = self.check()?;
        let k = tenant_key(object);
        if state.tenant_objects.contains_key(&k) {
            return Err(ClusterError::AlreadyExists {
                kind: object.kind(),
                name: object.name().to_string(),
            });
        }
        state.tenant_objects.insert(k, object.clone());
        state.creates += 1;
        state.writes += 1;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool, ClusterError> {
        let mut state = self.check()?;
        let before = state.tenant_objects.len();
        state
            .tenant_objects
            .retain(|(kind, ns, obj_name), _| !(ns == name || (kind == "namespace" && obj_name == name)));
        let removed = state.tenant_objects.len() != before;
        state.deployments.retain(|(ns, _), _| ns != name);
        state.services.retain(|(ns, _), _| ns != name);
        if removed {
            state.writes += 1;
        }
        Ok(removed)
    }
}

/// Deployments grouped by their role label, for invariant checks in tests.
pub fn roles_of(deployments: &[Deployment]) -> HashMap<String, Vec<String>> {
    let mut roles: HashMap<String, Vec<String>> = HashMap::new();
    for d in deployments {
        let role = d
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(super::labels::LABEL_ROLE))
            .cloned()
            .unwrap_or_default();
        roles
            .entry(role)
            .or_default()
            .push(d.metadata.name.clone().unwrap_or_default());
    }
    roles
}

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    LimitRange, LimitRangeItem, LimitRangeSpec, Namespace, ResourceQuota, ResourceQuotaSpec,
    ServiceAccount,
};
use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicySpec};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use crate::server::cluster::labels::{PlatformLabels, LABEL_TENANT};
use crate::server::cluster::TenantObject;
use crate::server::settings::{CpuMemory, LimitRangeSettings, QuotaSettings};

pub const QUOTA_NAME: &str = "tenant-quota";
pub const LIMIT_RANGE_NAME: &str = "tenant-limits";
pub const NETWORK_POLICY_NAME: &str = "default-deny";
pub const SERVICE_ACCOUNT_NAME: &str = "tenant-admin";
pub const ROLE_NAME: &str = "tenant-admin-role";
pub const ROLE_BINDING_NAME: &str = "tenant-admin-binding";

const CRUD_VERBS: [&str; 7] = ["get", "list", "watch", "create", "update", "patch", "delete"];
const READ_VERBS: [&str; 3] = ["get", "list", "watch"];

/// Builds the fixed set of objects every tenant namespace receives.
#[derive(Debug, Clone)]
pub struct TenantManifests {
    labels: PlatformLabels,
    quota: QuotaSettings,
    limits: LimitRangeSettings,
}

impl TenantManifests {
    pub fn new(labels: PlatformLabels, quota: QuotaSettings, limits: LimitRangeSettings) -> Self {
        Self {
            labels,
            quota,
            limits,
        }
    }

    pub fn labels(&self) -> &PlatformLabels {
        &self.labels
    }

    /// Objects in creation order; the namespace comes first.
    pub fn bundle(&self, namespace: &str) -> Vec<TenantObject> {
        vec![
            TenantObject::Namespace(self.namespace(namespace)),
            TenantObject::ResourceQuota(self.resource_quota(namespace)),
            TenantObject::LimitRange(self.limit_range(namespace)),
            TenantObject::NetworkPolicy(self.network_policy(namespace)),
            TenantObject::ServiceAccount(self.service_account(namespace)),
            TenantObject::Role(self.role(namespace)),
            TenantObject::RoleBinding(self.role_binding(namespace)),
        ]
    }

    fn tenant_labels(&self, namespace: &str) -> BTreeMap<String, String> {
        let mut labels = self.labels.base();
        labels.insert(LABEL_TENANT.to_string(), namespace.to_string());
        labels
    }

    fn metadata(&self, namespace: &str, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(self.tenant_labels(namespace)),
            ..Default::default()
        }
    }

    pub fn namespace(&self, namespace: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                labels: Some(self.tenant_labels(namespace)),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn resource_quota(&self, namespace: &str) -> ResourceQuota {
        let hard = [
            ("requests.cpu", &self.quota.requests_cpu),
            ("requests.memory", &self.quota.requests_memory),
            ("limits.cpu", &self.quota.limits_cpu),
            ("limits.memory", &self.quota.limits_memory),
            ("pods", &self.quota.pods),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), Quantity(value.clone())))
        .collect();

        ResourceQuota {
            metadata: self.metadata(namespace, QUOTA_NAME),
            spec: Some(ResourceQuotaSpec {
                hard: Some(hard),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn limit_range(&self, namespace: &str) -> LimitRange {
        LimitRange {
            metadata: self.metadata(namespace, LIMIT_RANGE_NAME),
            spec: Some(LimitRangeSpec {
                limits: vec![LimitRangeItem {
                    type_: "Container".to_string(),
                    default_request: Some(quantities(&self.limits.default_request)),
                    default: Some(quantities(&self.limits.default_limit)),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }
    }

    /// Deny all ingress and egress for every pod unless another policy allows it.
    pub fn network_policy(&self, namespace: &str) -> NetworkPolicy {
        NetworkPolicy {
            metadata: self.metadata(namespace, NETWORK_POLICY_NAME),
            spec: Some(NetworkPolicySpec {
                pod_selector: LabelSelector::default(),
                policy_types: Some(vec!["Ingress".to_string(), "Egress".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn service_account(&self, namespace: &str) -> ServiceAccount {
        ServiceAccount {
            metadata: self.metadata(namespace, SERVICE_ACCOUNT_NAME),
            ..Default::default()
        }
    }

    pub fn role(&self, namespace: &str) -> Role {
        Role {
            metadata: self.metadata(namespace, ROLE_NAME),
            rules: Some(vec![
                rule("apps", &["deployments"], &CRUD_VERBS),
                rule("", &["services"], &CRUD_VERBS),
                rule("networking.k8s.io", &["ingresses"], &CRUD_VERBS),
                rule("", &["pods", "pods/log"], &READ_VERBS),
            ]),
            ..Default::default()
        }
    }

    pub fn role_binding(&self, namespace: &str) -> RoleBinding {
        RoleBinding {
            metadata: self.metadata(namespace, ROLE_BINDING_NAME),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "Role".to_string(),
                name: ROLE_NAME.to_string(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: SERVICE_ACCOUNT_NAME.to_string(),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }
}

fn quantities(values: &CpuMemory) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(values.cpu.clone())),
        ("memory".to_string(), Quantity(values.memory.clone())),
    ])
}

fn rule(api_group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![api_group.to_string()]),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

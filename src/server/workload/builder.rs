use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HTTPGetAction, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, SecurityContext, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::models::ApplicationSpec;
use crate::server::settings::WorkloadSettings;
use crate::server::cluster::labels::{
    PlatformLabels, Role, ANNOTATION_IDLE_REPLICAS, ANNOTATION_METRICS_PATH,
    ANNOTATION_SERVICE_NAME, LABEL_ROLE,
};

pub const HTTP_PORT_NAME: &str = "http";

/// Resource requests and limits applied when a spec carries none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDefaults {
    pub requests_cpu: String,
    pub requests_memory: String,
    pub limits_cpu: String,
    pub limits_memory: String,
}

impl Default for ResourceDefaults {
    fn default() -> Self {
        Self {
            requests_cpu: "100m".to_string(),
            requests_memory: "128Mi".to_string(),
            limits_cpu: "500m".to_string(),
            limits_memory: "512Mi".to_string(),
        }
    }
}

impl From<&WorkloadSettings> for ResourceDefaults {
    fn from(settings: &WorkloadSettings) -> Self {
        Self {
            requests_cpu: settings.default_requests.cpu.clone(),
            requests_memory: settings.default_requests.memory.clone(),
            limits_cpu: settings.default_limits.cpu.clone(),
            limits_memory: settings.default_limits.memory.clone(),
        }
    }
}

/// Turns an [`ApplicationSpec`] into Kubernetes objects.
#[derive(Debug, Clone)]
pub struct WorkloadBuilder {
    labels: PlatformLabels,
    defaults: ResourceDefaults,
}

impl WorkloadBuilder {
    pub fn new(labels: PlatformLabels, defaults: ResourceDefaults) -> Self {
        Self { labels, defaults }
    }

    pub fn labels(&self) -> &PlatformLabels {
        &self.labels
    }

    /// Fresh Deployment named `name` carrying `role`.
    pub fn deployment(
        &self,
        spec: &ApplicationSpec,
        namespace: &str,
        name: &str,
        role: Role,
    ) -> Deployment {
        let app = spec.app_label();
        let mut deployment = Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(self.labels.for_role(app, role)),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(spec.replicas),
                selector: LabelSelector {
                    match_labels: Some(PlatformLabels::deployment_selector(app)),
                    ..Default::default()
                },
                strategy: Some(DeploymentStrategy {
                    type_: Some("RollingUpdate".to_string()),
                    rolling_update: Some(RollingUpdateDeployment {
                        max_surge: Some(IntOrString::Int(1)),
                        max_unavailable: Some(IntOrString::Int(0)),
                    }),
                }),
                template: self.pod_template(spec, role),
                ..Default::default()
            }),
            ..Default::default()
        };
        record_service(&mut deployment, spec.service_name());
        if role == Role::Idle {
            park(&mut deployment, spec.replicas);
        }
        deployment
    }

    /// Rewrite the mutable fields of an existing Deployment.
    ///
    /// Identity, selector and strategy stay as they are. Labels are merged so keys added by
    /// operators survive.
    pub fn adopt_deployment(
        &self,
        mut existing: Deployment,
        spec: &ApplicationSpec,
        role: Role,
    ) -> Deployment {
        let app = spec.app_label();
        let labels = existing.metadata.labels.get_or_insert_with(BTreeMap::new);
        labels.extend(self.labels.for_role(app, role));

        let template = self.pod_template(spec, role);
        match existing.spec.as_mut() {
            Some(deployment_spec) => {
                deployment_spec.replicas = Some(spec.replicas);
                deployment_spec.template = template;
            }
            None => {
                existing.spec = Some(DeploymentSpec {
                    replicas: Some(spec.replicas),
                    selector: LabelSelector {
                        match_labels: Some(PlatformLabels::deployment_selector(app)),
                        ..Default::default()
                    },
                    template,
                    ..Default::default()
                });
            }
        }

        record_service(&mut existing, spec.service_name());
        if role == Role::Idle {
            park(&mut existing, spec.replicas);
        } else if let Some(annotations) = existing.metadata.annotations.as_mut() {
            annotations.remove(ANNOTATION_IDLE_REPLICAS);
        }
        existing
    }

    fn pod_template(&self, spec: &ApplicationSpec, role: Role) -> PodTemplateSpec {
        let port = i32::from(spec.effective_port());
        let annotations = spec.metrics_path.as_ref().filter(|p| !p.is_empty()).map(|path| {
            BTreeMap::from([(ANNOTATION_METRICS_PATH.to_string(), path.clone())])
        });

        let env: Vec<EnvVar> = spec
            .env
            .iter()
            .map(|var| EnvVar {
                name: var.name.clone(),
                value: Some(var.value.clone()),
                ..Default::default()
            })
            .collect();

        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(self.labels.for_role(spec.app_label(), role)),
                annotations,
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: spec.container_name().to_string(),
                    image: Some(spec.image_reference()),
                    image_pull_policy: Some("Always".to_string()),
                    ports: Some(vec![ContainerPort {
                        name: Some(HTTP_PORT_NAME.to_string()),
                        container_port: port,
                        ..Default::default()
                    }]),
                    env: if env.is_empty() { None } else { Some(env) },
                    liveness_probe: Some(http_probe(spec.effective_health_path(), port, 10, 10)),
                    readiness_probe: Some(http_probe(
                        spec.effective_readiness_path(),
                        port,
                        5,
                        5,
                    )),
                    resources: Some(self.resources(spec)),
                    security_context: security_context(spec),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        }
    }

    fn resources(&self, spec: &ApplicationSpec) -> ResourceRequirements {
        let requested = spec.resources.clone().unwrap_or_default();
        let pick = |value: Option<String>, default: &str| {
            Quantity(value.filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string()))
        };
        ResourceRequirements {
            requests: Some(BTreeMap::from([
                (
                    "cpu".to_string(),
                    pick(requested.requests.cpu, &self.defaults.requests_cpu),
                ),
                (
                    "memory".to_string(),
                    pick(requested.requests.memory, &self.defaults.requests_memory),
                ),
            ])),
            limits: Some(BTreeMap::from([
                (
                    "cpu".to_string(),
                    pick(requested.limits.cpu, &self.defaults.limits_cpu),
                ),
                (
                    "memory".to_string(),
                    pick(requested.limits.memory, &self.defaults.limits_memory),
                ),
            ])),
            ..Default::default()
        }
    }

    /// Fresh ClusterIP Service selecting the active role of the application.
    pub fn service(&self, spec: &ApplicationSpec, namespace: &str) -> Service {
        let port = i32::from(spec.effective_port());
        Service {
            metadata: ObjectMeta {
                name: Some(spec.service_name().to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(self.labels.for_app(spec.app_label())),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(PlatformLabels::service_selector(spec.app_label())),
                ports: Some(vec![ServicePort {
                    name: Some(HTTP_PORT_NAME.to_string()),
                    port,
                    target_port: Some(IntOrString::Int(port)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Point an existing Service at the application.
    ///
    /// Only labels, the selector and the target port of the `http` port (or the first port) are
    /// touched. Service type, port numbers and node ports are left exactly as found.
    pub fn adopt_service(&self, mut existing: Service, spec: &ApplicationSpec) -> Service {
        let port = i32::from(spec.effective_port());
        let labels = existing.metadata.labels.get_or_insert_with(BTreeMap::new);
        labels.extend(self.labels.for_app(spec.app_label()));

        let service_spec = existing.spec.get_or_insert_with(ServiceSpec::default);
        service_spec.selector = Some(PlatformLabels::service_selector(spec.app_label()));

        let ports = service_spec.ports.get_or_insert_with(Vec::new);
        let index = ports
            .iter()
            .position(|p| p.name.as_deref() == Some(HTTP_PORT_NAME))
            .unwrap_or(0);
        match ports.get_mut(index) {
            Some(existing_port) => existing_port.target_port = Some(IntOrString::Int(port)),
            None => ports.push(ServicePort {
                name: Some(HTTP_PORT_NAME.to_string()),
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }),
        }
        existing
    }
}

fn http_probe(path: String, port: i32, initial_delay: i32, period: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        timeout_seconds: Some(2),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

fn security_context(spec: &ApplicationSpec) -> Option<SecurityContext> {
    if spec.compat_mode {
        return None;
    }
    Some(SecurityContext {
        run_as_non_root: Some(spec.run_as_non_root),
        run_as_user: Some(spec.run_as_user),
        allow_privilege_escalation: Some(false),
        ..Default::default()
    })
}

fn record_service(deployment: &mut Deployment, service: &str) {
    deployment
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(ANNOTATION_SERVICE_NAME.to_string(), service.to_string());
}

/// Scale a Deployment to zero, remembering the replica count it should come back with.
pub fn park(deployment: &mut Deployment, remembered: i32) {
    deployment
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(ANNOTATION_IDLE_REPLICAS.to_string(), remembered.max(1).to_string());
    if let Some(spec) = deployment.spec.as_mut() {
        spec.replicas = Some(0);
    }
}

/// Replica count to restore when a Deployment goes live again: the remembered count for parked
/// Deployments, the current count otherwise, never below one.
pub fn live_replicas(deployment: &Deployment) -> i32 {
    let remembered = deployment
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_IDLE_REPLICAS))
        .and_then(|v| v.parse::<i32>().ok());
    let current = deployment.spec.as_ref().and_then(|s| s.replicas);
    remembered.or(current).unwrap_or(1).max(1)
}

/// Set the role label on a Deployment and its pod template.
pub fn set_role(deployment: &mut Deployment, role: Role) {
    deployment
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(LABEL_ROLE.to_string(), role.to_string());
    if let Some(spec) = deployment.spec.as_mut() {
        spec.template
            .metadata
            .get_or_insert_with(ObjectMeta::default)
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(LABEL_ROLE.to_string(), role.to_string());
    }
}

/// Set the replica count, clearing the parked marker when going live.
pub fn set_replicas(deployment: &mut Deployment, replicas: i32) {
    if replicas > 0 {
        if let Some(annotations) = deployment.metadata.annotations.as_mut() {
            annotations.remove(ANNOTATION_IDLE_REPLICAS);
        }
    }
    if let Some(spec) = deployment.spec.as_mut() {
        spec.replicas = Some(replicas);
    }
}

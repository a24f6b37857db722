use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::models::{ConditionReport, DeploymentReport, PortReport, ServiceReport, StatusReport};
use crate::server::cluster::labels::{PlatformLabels, LABEL_APP, LABEL_ROLE};
use crate::server::cluster::{ClusterApi, ClusterError};
use crate::server::workload::reconciler::identify;

/// Read-only view of what the platform is running in a namespace.
pub struct StatusReporter {
    cluster: Arc<dyn ClusterApi>,
    labels: PlatformLabels,
}

impl StatusReporter {
    pub fn new(cluster: Arc<dyn ClusterApi>, labels: PlatformLabels) -> Self {
        Self { cluster, labels }
    }

    pub async fn report(
        &self,
        namespace: &str,
        name: Option<&str>,
    ) -> Result<StatusReport, ClusterError> {
        let identity = match name {
            Some(name) => Some(identify(self.cluster.as_ref(), namespace, name).await?),
            None => None,
        };
        let query = match &identity {
            Some(identity) => self.labels.app_query(&identity.app),
            None => self.labels.managed_query(),
        };
        let mut deployments: Vec<DeploymentReport> = self
            .cluster
            .list_deployments(namespace, &query)
            .await?
            .iter()
            .map(deployment_report)
            .collect();
        deployments.sort_by(|a, b| a.name.cmp(&b.name));

        let service = match &identity {
            Some(identity) => Some(
                self.cluster
                    .get_service(namespace, &identity.service)
                    .await?
                    .map(|s| service_report(&s)),
            ),
            None => None,
        };

        Ok(StatusReport {
            namespace: namespace.to_string(),
            deployments,
            service,
        })
    }
}

fn deployment_report(deployment: &Deployment) -> DeploymentReport {
    let labels = deployment.metadata.labels.as_ref();
    let spec = deployment.spec.as_ref();
    let status = deployment.status.as_ref();

    DeploymentReport {
        name: deployment.metadata.name.clone().unwrap_or_default(),
        app: labels.and_then(|l| l.get(LABEL_APP)).cloned(),
        role: labels.and_then(|l| l.get(LABEL_ROLE)).cloned(),
        image: spec
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|p| p.containers.first())
            .and_then(|c| c.image.clone()),
        desired: spec.and_then(|s| s.replicas).unwrap_or(1),
        current: status.and_then(|s| s.replicas).unwrap_or(0),
        ready: status.and_then(|s| s.ready_replicas).unwrap_or(0),
        available: status.and_then(|s| s.available_replicas).unwrap_or(0),
        updated: status.and_then(|s| s.updated_replicas).unwrap_or(0),
        conditions: status
            .and_then(|s| s.conditions.as_ref())
            .map(|conditions| {
                conditions
                    .iter()
                    .map(|c| ConditionReport {
                        type_: c.type_.clone(),
                        status: c.status.clone(),
                        reason: c.reason.clone(),
                        message: c.message.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn service_report(service: &Service) -> ServiceReport {
    let spec = service.spec.as_ref();
    ServiceReport {
        name: service.metadata.name.clone().unwrap_or_default(),
        type_: spec.and_then(|s| s.type_.clone()),
        selector: spec.and_then(|s| s.selector.clone()).unwrap_or_default(),
        ports: spec
            .and_then(|s| s.ports.as_ref())
            .map(|ports| {
                ports
                    .iter()
                    .map(|p| PortReport {
                        name: p.name.clone(),
                        port: p.port,
                        target_port: p.target_port.as_ref().map(|t| match t {
                            IntOrString::Int(i) => i.to_string(),
                            IntOrString::String(s) => s.clone(),
                        }),
                        node_port: p.node_port,
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

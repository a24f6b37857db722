use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8080;
pub const MAX_REPLICAS: i32 = 50;
pub const PREVIEW_SUFFIX: &str = "-preview";

lazy_static! {
    static ref DNS_LABEL: Regex = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap();
    static ref ENV_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Whether `value` is usable as a Kubernetes object name or namespace.
pub fn is_dns_label(value: &str) -> bool {
    value.len() <= 63 && DNS_LABEL.is_match(value)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuantities {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default)]
    pub requests: ResourceQuantities,
    #[serde(default)]
    pub limits: ResourceQuantities,
}

/// Desired state of one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    pub name: String,
    /// Only honored for privileged callers, see the namespace guard
    #[serde(default)]
    pub namespace: Option<String>,
    pub image: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub health_path: Option<String>,
    #[serde(default)]
    pub readiness_path: Option<String>,
    #[serde(default)]
    pub metrics_path: Option<String>,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub resources: Option<ResourceSpec>,
    #[serde(default = "default_run_as_non_root")]
    pub run_as_non_root: bool,
    #[serde(default = "default_run_as_user")]
    pub run_as_user: i64,
    /// Drop the container security constraints for images that cannot run unprivileged
    #[serde(default)]
    pub compat_mode: bool,
    #[serde(default)]
    pub app_label: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
}

fn default_tag() -> String {
    "latest".to_string()
}

fn default_replicas() -> i32 {
    1
}

fn default_run_as_non_root() -> bool {
    true
}

fn default_run_as_user() -> i64 {
    1001
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ApplicationSpec {
    /// Minimal spec with defaults for everything but name and image.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            image: image.into(),
            tag: default_tag(),
            port: None,
            health_path: None,
            readiness_path: None,
            metrics_path: None,
            replicas: default_replicas(),
            env: Vec::new(),
            resources: None,
            run_as_non_root: default_run_as_non_root(),
            run_as_user: default_run_as_user(),
            compat_mode: false,
            app_label: None,
            service_name: None,
            container_name: None,
        }
    }

    /// Check the spec and return every problem found, joined into one message.
    pub fn validate(&self) -> Result<(), String> {
        let mut problems = Vec::new();

        if !is_dns_label(&self.name) {
            problems.push(format!(
                "name '{}' must be a DNS label (lowercase alphanumerics and '-', at most 63 characters)",
                self.name
            ));
        } else if self.name.len() + PREVIEW_SUFFIX.len() > 63 {
            problems.push(format!(
                "name '{}' leaves no room for the '{}' suffix",
                self.name, PREVIEW_SUFFIX
            ));
        }
        for (field, value) in [
            ("appLabel", &self.app_label),
            ("serviceName", &self.service_name),
            ("containerName", &self.container_name),
        ] {
            if let Some(v) = non_empty(value) {
                if !is_dns_label(v) {
                    problems.push(format!("{} '{}' must be a DNS label", field, v));
                }
            }
        }
        if self.image.trim().is_empty() {
            problems.push("image must not be empty".to_string());
        }
        if self.tag.trim().is_empty() {
            problems.push("tag must not be empty".to_string());
        }
        if self.port == Some(0) {
            problems.push("port must be between 1 and 65535".to_string());
        }
        if !(1..=MAX_REPLICAS).contains(&self.replicas) {
            problems.push(format!("replicas must be between 1 and {}", MAX_REPLICAS));
        }
        let mut seen = HashSet::new();
        for var in &self.env {
            if !ENV_NAME.is_match(&var.name) {
                problems.push(format!("env name '{}' is not a valid identifier", var.name));
            }
            if !seen.insert(var.name.as_str()) {
                problems.push(format!("env name '{}' is duplicated", var.name));
            }
        }
        for (field, value) in [
            ("healthPath", &self.health_path),
            ("readinessPath", &self.readiness_path),
            ("metricsPath", &self.metrics_path),
        ] {
            if let Some(v) = non_empty(value) {
                if !v.starts_with('/') {
                    problems.push(format!("{} '{}' must start with '/'", field, v));
                }
            }
        }
        if self.run_as_user < 0 {
            problems.push("runAsUser must not be negative".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }

    pub fn image_reference(&self) -> String {
        if self.tag.starts_with("sha256:") {
            format!("{}@{}", self.image, self.tag)
        } else {
            format!("{}:{}", self.image, self.tag)
        }
    }

    /// Falls back to 8080 for unset and privileged ports.
    pub fn effective_port(&self) -> u16 {
        match self.port {
            Some(port) if port >= 1024 => port,
            _ => DEFAULT_PORT,
        }
    }

    pub fn effective_health_path(&self) -> String {
        non_empty(&self.health_path).unwrap_or("/").to_string()
    }

    pub fn effective_readiness_path(&self) -> String {
        non_empty(&self.readiness_path)
            .map(str::to_string)
            .unwrap_or_else(|| self.effective_health_path())
    }

    pub fn app_label(&self) -> &str {
        non_empty(&self.app_label).unwrap_or(self.name.as_str())
    }

    pub fn service_name(&self) -> &str {
        non_empty(&self.service_name).unwrap_or(self.name.as_str())
    }

    pub fn container_name(&self) -> &str {
        non_empty(&self.container_name).unwrap_or(self.name.as_str())
    }

    pub fn preview_name(&self) -> String {
        preview_name(&self.name)
    }
}

pub fn preview_name(name: &str) -> String {
    format!("{}{}", name, PREVIEW_SUFFIX)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleRequest {
    pub name: String,
    pub replicas: i32,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl ScaleRequest {
    pub fn validate(&self) -> Result<(), String> {
        if !is_dns_label(&self.name) {
            return Err(format!("name '{}' must be a DNS label", self.name));
        }
        if !(1..=MAX_REPLICAS).contains(&self.replicas) {
            return Err(format!("replicas must be between 1 and {}", MAX_REPLICAS));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameAndNamespace {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl NameAndNamespace {
    pub fn validate(&self) -> Result<(), String> {
        if is_dns_label(&self.name) {
            Ok(())
        } else {
            Err(format!("name '{}' must be a DNS label", self.name))
        }
    }
}

/// Summary of a Deployment after a write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeSummary {
    pub name: String,
    pub role: Option<String>,
    pub image: Option<String>,
    pub replicas: i32,
    /// `true` when this call created the object, `false` when it adopted an existing one
    pub created: bool,
}

/// Summary of a Service after a write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: Option<String>,
    pub port: i32,
    pub target_port: i32,
    pub node_port: Option<i32>,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpsertResponse {
    pub namespace: String,
    pub deployment: ComputeSummary,
    pub service: NetworkSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeardownResponse {
    pub namespace: String,
    pub deleted_deployments: Vec<String>,
    pub deleted_service: Option<String>,
}

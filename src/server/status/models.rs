use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    /// Restrict the report to one application
    pub name: Option<String>,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionReport {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentReport {
    pub name: String,
    pub app: Option<String>,
    pub role: Option<String>,
    pub image: Option<String>,
    pub desired: i32,
    pub current: i32,
    pub ready: i32,
    pub available: i32,
    pub updated: i32,
    pub conditions: Vec<ConditionReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortReport {
    pub name: Option<String>,
    pub port: i32,
    pub target_port: Option<String>,
    pub node_port: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceReport {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<PortReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub namespace: String,
    pub deployments: Vec<DeploymentReport>,
    /// Only reported when the request names an application
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<Option<ServiceReport>>,
}

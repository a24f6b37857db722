//! Labeling contract shared by every resource the platform manages.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::apps::v1::Deployment;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const LABEL_MANAGED_BY: &str = "managed-by";
pub const LABEL_K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_APP: &str = "app";
pub const LABEL_ROLE: &str = "role";
pub const LABEL_TENANT: &str = "hostplane.dev/tenant";

/// Replica count a Deployment had before it was retired to `idle`.
pub const ANNOTATION_IDLE_REPLICAS: &str = "hostplane.dev/idle-replicas";
pub const ANNOTATION_METRICS_PATH: &str = "hostplane.dev/metrics-path";
/// Name of the Service in front of a Deployment's application.
pub const ANNOTATION_SERVICE_NAME: &str = "hostplane.dev/service-name";

lazy_static! {
    static ref LABEL_VALUE: Regex = Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").unwrap();
}

/// Whether `value` can be used as a (non-empty) label value.
pub fn is_label_value(value: &str) -> bool {
    value.len() <= 63 && LABEL_VALUE.is_match(value)
}

/// Traffic role of a compute resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Selected by the Service, receives live traffic
    Active,
    /// Staged next version, receives no traffic
    Preview,
    /// Retired previous version, scaled to zero
    Idle,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Active => "active",
            Role::Preview => "preview",
            Role::Idle => "idle",
        }
    }

    /// Role label of a Deployment, `None` when missing or unrecognized.
    pub fn of(deployment: &Deployment) -> Option<Role> {
        deployment
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(LABEL_ROLE))
            .and_then(|value| value.parse().ok())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Role::Active),
            "preview" => Ok(Role::Preview),
            "idle" => Ok(Role::Idle),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Builds label maps and selectors for a given platform id.
#[derive(Debug, Clone)]
pub struct PlatformLabels {
    platform_id: String,
}

impl PlatformLabels {
    pub fn new(platform_id: impl Into<String>) -> Self {
        Self {
            platform_id: platform_id.into(),
        }
    }

    pub fn platform_id(&self) -> &str {
        &self.platform_id
    }

    pub fn base(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_MANAGED_BY.to_string(), self.platform_id.clone()),
            (LABEL_K8S_MANAGED_BY.to_string(), self.platform_id.clone()),
        ])
    }

    pub fn for_app(&self, app: &str) -> BTreeMap<String, String> {
        let mut labels = self.base();
        labels.insert(LABEL_APP.to_string(), app.to_string());
        labels
    }

    pub fn for_role(&self, app: &str, role: Role) -> BTreeMap<String, String> {
        let mut labels = self.for_app(app);
        labels.insert(LABEL_ROLE.to_string(), role.to_string());
        labels
    }

    /// Selector of the Service in front of an application. Pinned to the active role.
    pub fn service_selector(app: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_APP.to_string(), app.to_string()),
            (LABEL_ROLE.to_string(), Role::Active.to_string()),
        ])
    }

    /// Selector of a Deployment. Never contains the role so role flips stay legal.
    pub fn deployment_selector(app: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(LABEL_APP.to_string(), app.to_string())])
    }

    /// Label query matching everything the platform manages.
    pub fn managed_query(&self) -> String {
        format!("{}={}", LABEL_MANAGED_BY, self.platform_id)
    }

    /// Label query matching every compute resource of one application.
    pub fn app_query(&self, app: &str) -> String {
        format!("{},{}={}", self.managed_query(), LABEL_APP, app)
    }
}

/// Evaluate an equality-based label query (`k=v,k2=v2`) against a label map.
pub fn matches_query(labels: Option<&BTreeMap<String, String>>, query: &str) -> bool {
    query
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.and_then(|l| l.get(key)).map(String::as_str) == Some(value),
            None => labels.map(|l| l.contains_key(term)).unwrap_or(false),
        })
}

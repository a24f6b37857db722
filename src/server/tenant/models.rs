use serde::{Deserialize, Serialize};

use crate::db::models::{ProvisioningRun, Tenant, TenantStatus, User};

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub company: String,
    pub email: String,
    /// Used verbatim when it is a valid DNS label, otherwise derived from the company name
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    pub tenant: Tenant,
    pub user: User,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListTenantsParams {
    #[serde(default)]
    pub status: Option<TenantStatus>,
}

/// A tenant together with its most recent provisioning run.
#[derive(Debug, Clone, Serialize)]
pub struct TenantOverview {
    pub tenant: Tenant,
    pub provisioning: Option<ProvisioningRun>,
}

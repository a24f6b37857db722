use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role carried in the signed token, also stored on user rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum PrincipalRole {
    PlatformAdmin,
    TenantAdmin,
    User,
    PendingUser,
}

impl PrincipalRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalRole::PlatformAdmin => "platform_admin",
            PrincipalRole::TenantAdmin => "tenant_admin",
            PrincipalRole::User => "user",
            PrincipalRole::PendingUser => "pending_user",
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self, PrincipalRole::PlatformAdmin)
    }
}

impl fmt::Display for PrincipalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrincipalRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "platform_admin" => Ok(PrincipalRole::PlatformAdmin),
            "tenant_admin" => Ok(PrincipalRole::TenantAdmin),
            "user" => Ok(PrincipalRole::User),
            "pending_user" => Ok(PrincipalRole::PendingUser),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Claims of a platform access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    /// Tenant id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<Uuid>,
    /// Bound namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ns: Option<String>,
    pub role: PrincipalRole,
    pub iat: u64,
    pub exp: u64,
}

/// Who is calling and which namespace they are bound to. Rebuilt from the token on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessContext {
    pub subject: String,
    pub tenant_id: Option<Uuid>,
    pub role: PrincipalRole,
    pub bound_namespace: Option<String>,
}

impl AccessContext {
    pub fn is_privileged(&self) -> bool {
        self.role.is_privileged()
    }

    /// Actor name written to audit entries.
    pub fn actor(&self) -> &str {
        &self.subject
    }
}

impl From<Claims> for AccessContext {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            tenant_id: claims.tid,
            role: claims.role,
            bound_namespace: claims.ns.filter(|ns| !ns.is_empty()),
        }
    }
}

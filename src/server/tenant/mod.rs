pub mod handlers;
pub mod manifests;
pub mod models;
pub mod notify;
pub mod onboarding;
pub mod provisioner;
pub mod routes;
pub mod store;

pub use onboarding::OnboardingService;
pub use provisioner::{ProvisioningSummary, TenantProvisioner};

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("tenant '{0}' not found")]
    NotFound(Uuid),

    /// Duplicate names or namespaces, and status changes the current state does not allow
    #[error("{0}")]
    Conflict(String),

    #[error("the caller is not bound to a tenant")]
    Unbound,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

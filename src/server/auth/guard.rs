//! Namespace access guard.
//!
//! Every handler resolves its target namespace here before touching the cluster. A non-privileged
//! caller can only ever reach the namespace bound into its token; a platform administrator may
//! name any namespace.

use tracing::warn;

use super::context::AccessContext;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    #[error("access to namespace '{requested}' is not allowed")]
    ForeignNamespace { requested: String },

    #[error("no namespace is bound to this principal")]
    Unbound,

    #[error("platform administrator privileges required")]
    NotPrivileged,
}

/// Resolve the namespace a request may operate on.
pub fn resolve(context: &AccessContext, requested: Option<&str>) -> Result<String, GuardError> {
    let requested = requested.map(str::trim).filter(|ns| !ns.is_empty());

    if context.is_privileged() {
        return requested
            .map(str::to_string)
            .or_else(|| context.bound_namespace.clone())
            .ok_or(GuardError::Unbound);
    }

    let bound = context.bound_namespace.as_deref().ok_or(GuardError::Unbound)?;
    match requested {
        Some(ns) if ns != bound => {
            warn!(
                subject = %context.subject,
                bound = %bound,
                requested = %ns,
                "Rejected cross-namespace request"
            );
            Err(GuardError::ForeignNamespace {
                requested: ns.to_string(),
            })
        }
        _ => Ok(bound.to_string()),
    }
}

pub fn require_privileged(context: &AccessContext) -> Result<(), GuardError> {
    if context.is_privileged() {
        Ok(())
    } else {
        Err(GuardError::NotPrivileged)
    }
}

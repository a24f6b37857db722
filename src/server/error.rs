use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::server::auth::GuardError;
use crate::server::cluster::ClusterError;
use crate::server::rollout::RolloutError;
use crate::server::tenant::TenantError;
use crate::server::workload::WorkloadError;

/// Server error type that provides automatic logging and clean error responses.
///
/// This type:
/// - Logs 5xx errors with their full source chain when converted to HTTP responses
/// - Allows attaching structured context (namespaces, operations, etc.)
/// - Returns a `{"error": message}` JSON body to clients
///
/// Every domain error converts into it, choosing the status code for its class: guard rejections
/// are 403, validation 400, conflicts 409, unreachable backends 502 and timeouts 503.
#[derive(Debug)]
pub struct ServerError {
    /// HTTP status code to return
    pub status: StatusCode,
    /// User-facing error message (returned in response)
    pub message: String,
    /// Internal error with full chain (logged but not exposed to client)
    pub source: Option<anyhow::Error>,
    /// Structured context for logging (key-value pairs)
    pub context: Vec<(&'static str, String)>,
}

impl ServerError {
    /// Create a new error with just status and message (no source error)
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            source: None,
            context: Vec::new(),
        }
    }

    /// Create an error from an anyhow::Error with full error chain
    pub fn from_anyhow(
        source: anyhow::Error,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            source: Some(source),
            context: Vec::new(),
        }
    }

    /// Add a context field for logging (chainable)
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Create a 500 Internal Server Error from an anyhow::Error
    pub fn internal_anyhow(source: anyhow::Error, message: impl Into<String>) -> Self {
        Self::from_anyhow(source, StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Create a 400 Bad Request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Create a 403 Forbidden error
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    /// Create a 404 Not Found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Create a 409 Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // Log server errors (5xx) with full context using structured fields
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = self.status.as_u16(),
                    message = %self.message,
                    context = ?self.context,
                    error = ?source,
                    "Server error"
                );
            } else {
                tracing::error!(
                    status = self.status.as_u16(),
                    message = %self.message,
                    context = ?self.context,
                    "Server error"
                );
            }
        }

        let body = Json(json!({
            "error": self.message,
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal_anyhow(err, "Internal server error")
    }
}

impl From<GuardError> for ServerError {
    fn from(err: GuardError) -> Self {
        Self::forbidden(err.to_string())
    }
}

impl From<ClusterError> for ServerError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::NotFound { .. } => Self::not_found(err.to_string()),
            ClusterError::AlreadyExists { .. } | ClusterError::Conflict { .. } => {
                Self::conflict(err.to_string())
            }
            ClusterError::Timeout { ref operation, .. } => {
                let operation = operation.clone();
                Self::from_anyhow(
                    err.into(),
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Cluster API did not respond in time",
                )
                .with_context("operation", operation)
            }
            ClusterError::Kube(_) => Self::from_anyhow(
                err.into(),
                StatusCode::BAD_GATEWAY,
                "Cluster API request failed",
            ),
        }
    }
}

impl From<WorkloadError> for ServerError {
    fn from(err: WorkloadError) -> Self {
        match err {
            WorkloadError::Validation(message) => Self::bad_request(message),
            WorkloadError::NotFound { .. } => Self::not_found(err.to_string()),
            WorkloadError::Cluster(e) => e.into(),
        }
    }
}

impl From<RolloutError> for ServerError {
    fn from(err: RolloutError) -> Self {
        match err {
            RolloutError::NothingToPromote { .. } => Self::forbidden(err.to_string()),
            RolloutError::Inconsistent { .. } | RolloutError::InvalidTransition { .. } => {
                Self::conflict(err.to_string())
            }
            RolloutError::Workload(e) => e.into(),
            RolloutError::Cluster(e) => e.into(),
        }
    }
}

impl From<TenantError> for ServerError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::Validation(message) => Self::bad_request(message),
            TenantError::NotFound(_) => Self::not_found(err.to_string()),
            TenantError::Conflict(message) => Self::conflict(message),
            TenantError::Unbound => Self::forbidden(err.to_string()),
            TenantError::Store(e) => Self::internal_anyhow(e, "Database operation failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn kube_unavailable() -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "connection refused".to_string(),
            reason: "ServiceUnavailable".to_string(),
            code: 503,
        })
    }

    #[test]
    fn test_guard_rejection_is_forbidden() {
        let err: ServerError = GuardError::ForeignNamespace {
            requested: "tenant-other".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert!(err.message.contains("tenant-other"));
    }

    #[test]
    fn test_cluster_error_classes() {
        let timeout: ServerError = ClusterError::Timeout {
            operation: "get deployment".to_string(),
            after: Duration::from_secs(10),
        }
        .into();
        assert_eq!(timeout.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(timeout.context, vec![("operation", "get deployment".to_string())]);

        let unavailable: ServerError = ClusterError::Kube(kube_unavailable()).into();
        assert_eq!(unavailable.status, StatusCode::BAD_GATEWAY);
        assert!(unavailable.source.is_some());
    }

    #[test]
    fn test_rollout_error_classes() {
        let nothing: ServerError = RolloutError::NothingToPromote {
            namespace: "tenant-acme".to_string(),
            app: "web".to_string(),
        }
        .into();
        assert_eq!(nothing.status, StatusCode::FORBIDDEN);

        let wrapped: ServerError =
            RolloutError::Workload(WorkloadError::Validation("bad image".to_string())).into();
        assert_eq!(wrapped.status, StatusCode::BAD_REQUEST);
        assert_eq!(wrapped.message, "bad image");
    }

    #[test]
    fn test_tenant_error_classes() {
        let conflict: ServerError = TenantError::Conflict("taken".to_string()).into();
        assert_eq!(conflict.status, StatusCode::CONFLICT);

        let missing: ServerError = TenantError::NotFound(uuid::Uuid::nil()).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_response_body() {
        let response = ServerError::bad_request("replicas must be between 1 and 50").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "replicas must be between 1 and 50");
    }
}

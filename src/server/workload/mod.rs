pub mod builder;
pub mod handlers;
pub mod models;
pub mod reconciler;
pub mod routes;

pub use reconciler::WorkloadReconciler;

use crate::server::cluster::ClusterError;

#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("deployment '{name}' not found in namespace '{namespace}'")]
    NotFound { namespace: String, name: String },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

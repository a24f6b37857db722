pub mod controller;
pub mod handlers;
pub mod lookup;
pub mod routes;
pub mod state_machine;

pub use controller::{BlueGreenController, PrepareOutcome, RolloutOutcome};

use crate::server::cluster::ClusterError;
use crate::server::workload::WorkloadError;

#[derive(Debug, thiserror::Error)]
pub enum RolloutError {
    #[error("application '{app}' has no preview deployment to promote in namespace '{namespace}'")]
    NothingToPromote { namespace: String, app: String },

    #[error("application '{app}' has more than one deployment with role '{role}': {names:?}")]
    Inconsistent {
        app: String,
        role: String,
        names: Vec<String>,
    },

    #[error("illegal role transition for '{name}': {from} -> {to}")]
    InvalidTransition {
        name: String,
        from: String,
        to: String,
    },

    #[error(transparent)]
    Workload(#[from] WorkloadError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

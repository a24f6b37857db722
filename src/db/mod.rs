pub mod audit_logs;
pub mod models;
pub mod provisioning_runs;
pub mod tenants;
pub mod users;

pub use models::*;

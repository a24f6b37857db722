pub mod handlers;
pub mod models;
pub mod reporter;
pub mod routes;

pub use reporter::StatusReporter;

use super::handlers;
use crate::server::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

/// Routes reachable without a token.
pub fn public_routes() -> Router<AppState> {
    Router::new().route("/onboarding/register", post(handlers::register))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/onboarding/me", get(handlers::my_status))
        .route("/admin/tenants", get(handlers::list_tenants))
        .route("/admin/tenants/{id}/approve", post(handlers::approve_tenant))
        .route("/admin/tenants/{id}/reject", post(handlers::reject_tenant))
        .route("/admin/tenants/{id}/suspend", post(handlers::suspend_tenant))
        .route(
            "/admin/tenants/{id}/reprovision",
            post(handlers::reprovision_tenant),
        )
        .route(
            "/admin/tenants/{id}/provisioning",
            get(handlers::provisioning_status),
        )
}

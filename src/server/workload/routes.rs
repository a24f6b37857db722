use super::handlers;
use crate::server::state::AppState;
use axum::{
    routing::{delete, post},
    Router,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/apps/deploy", post(handlers::deploy))
        .route("/apps/scale", post(handlers::scale))
        .route("/apps/{name}", delete(handlers::teardown))
}

use super::handlers;
use crate::server::state::AppState;
use axum::{routing::post, Router};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/apps/bluegreen/prepare", post(handlers::prepare))
        .route("/apps/bluegreen/promote", post(handlers::promote))
        .route("/apps/bluegreen/rollback", post(handlers::rollback))
}

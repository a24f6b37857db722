use super::models::{StatusParams, StatusReport};
use crate::server::auth::{guard, AccessContext};
use crate::server::error::ServerError;
use crate::server::state::AppState;
use crate::server::workload::models::is_dns_label;
use axum::{
    extract::{Extension, Query, State},
    Json,
};

pub async fn app_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Query(params): Query<StatusParams>,
) -> Result<Json<StatusReport>, ServerError> {
    let namespace = guard::resolve(&ctx, params.namespace.as_deref())?;
    let name = params.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    if let Some(name) = name {
        if !is_dns_label(name) {
            return Err(ServerError::bad_request(format!(
                "name '{}' must be a DNS label",
                name
            )));
        }
    }

    let report = state.status.report(&namespace, name).await?;
    Ok(Json(report))
}

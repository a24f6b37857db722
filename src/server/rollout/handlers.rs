use super::{PrepareOutcome, RolloutOutcome};
use crate::server::auth::{guard, AccessContext};
use crate::server::error::ServerError;
use crate::server::state::AppState;
use crate::server::workload::models::{ApplicationSpec, NameAndNamespace};
use axum::{
    extract::{Extension, State},
    Json,
};

/// Stage a new version of an application next to the live one.
pub async fn prepare(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Json(spec): Json<ApplicationSpec>,
) -> Result<Json<PrepareOutcome>, ServerError> {
    let namespace = guard::resolve(&ctx, spec.namespace.as_deref())?;
    let outcome = state.rollout.prepare(&spec, &namespace).await?;
    Ok(Json(outcome))
}

pub async fn promote(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Json(payload): Json<NameAndNamespace>,
) -> Result<Json<RolloutOutcome>, ServerError> {
    let namespace = guard::resolve(&ctx, payload.namespace.as_deref())?;
    payload.validate().map_err(ServerError::bad_request)?;

    let outcome = state.rollout.promote(&payload.name, &namespace).await?;
    Ok(Json(outcome))
}

pub async fn rollback(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Json(payload): Json<NameAndNamespace>,
) -> Result<Json<RolloutOutcome>, ServerError> {
    let namespace = guard::resolve(&ctx, payload.namespace.as_deref())?;
    payload.validate().map_err(ServerError::bad_request)?;

    let outcome = state.rollout.rollback(&payload.name, &namespace).await?;
    Ok(Json(outcome))
}

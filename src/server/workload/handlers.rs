use super::models::{
    is_dns_label, ApplicationSpec, ComputeSummary, ScaleRequest, TeardownResponse, UpsertResponse,
};
use crate::server::auth::{guard, AccessContext};
use crate::server::error::ServerError;
use crate::server::state::AppState;
use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct NamespaceParams {
    pub namespace: Option<String>,
}

/// Create or update an application's Deployment and Service.
pub async fn deploy(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Json(spec): Json<ApplicationSpec>,
) -> Result<Json<UpsertResponse>, ServerError> {
    let namespace = guard::resolve(&ctx, spec.namespace.as_deref())?;
    let response = state.reconciler.upsert_workload(&spec, &namespace).await?;
    Ok(Json(response))
}

pub async fn scale(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Json(payload): Json<ScaleRequest>,
) -> Result<Json<ComputeSummary>, ServerError> {
    let namespace = guard::resolve(&ctx, payload.namespace.as_deref())?;
    payload.validate().map_err(ServerError::bad_request)?;

    let summary = state
        .reconciler
        .scale(&payload.name, &namespace, payload.replicas)
        .await?;
    Ok(Json(summary))
}

pub async fn teardown(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Path(name): Path<String>,
    Query(params): Query<NamespaceParams>,
) -> Result<Json<TeardownResponse>, ServerError> {
    let namespace = guard::resolve(&ctx, params.namespace.as_deref())?;
    if !is_dns_label(&name) {
        return Err(ServerError::bad_request(format!(
            "name '{}' must be a DNS label",
            name
        )));
    }

    let response = state.reconciler.teardown(&name, &namespace).await?;
    Ok(Json(response))
}

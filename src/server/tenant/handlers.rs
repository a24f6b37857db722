use super::models::{
    ListTenantsParams, RegisterRequest, RegisterResponse, RejectRequest, TenantOverview,
};
use crate::db::models::Tenant;
use crate::server::auth::{guard, AccessContext};
use crate::server::error::ServerError;
use crate::server::state::AppState;
use axum::{
    body::Bytes,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

/// Public self-service registration of a new tenant.
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ServerError> {
    let response = state.onboarding.register(payload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn my_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
) -> Result<Json<TenantOverview>, ServerError> {
    let overview = state.onboarding.my_status(&ctx).await?;
    Ok(Json(overview))
}

pub async fn list_tenants(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Query(params): Query<ListTenantsParams>,
) -> Result<Json<Vec<Tenant>>, ServerError> {
    guard::require_privileged(&ctx)?;
    let tenants = state.onboarding.list(params.status).await?;
    Ok(Json(tenants))
}

pub async fn approve_tenant(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<TenantOverview>), ServerError> {
    guard::require_privileged(&ctx)?;
    let overview = state.onboarding.approve(id, ctx.actor()).await?;
    Ok((StatusCode::ACCEPTED, Json(overview)))
}

pub async fn reject_tenant(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<Tenant>, ServerError> {
    guard::require_privileged(&ctx)?;
    // The body is optional
    let payload: RejectRequest = if body.is_empty() {
        RejectRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ServerError::bad_request(format!("Invalid request body: {}", e)))?
    };
    let reason = payload.reason;
    let tenant = state.onboarding.reject(id, reason, ctx.actor()).await?;
    Ok(Json(tenant))
}

pub async fn suspend_tenant(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Tenant>, ServerError> {
    guard::require_privileged(&ctx)?;
    let tenant = state.onboarding.suspend(id, ctx.actor()).await?;
    Ok(Json(tenant))
}

pub async fn reprovision_tenant(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<TenantOverview>), ServerError> {
    guard::require_privileged(&ctx)?;
    let overview = state.onboarding.reprovision(id, ctx.actor()).await?;
    Ok((StatusCode::ACCEPTED, Json(overview)))
}

pub async fn provisioning_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<TenantOverview>, ServerError> {
    guard::require_privileged(&ctx)?;
    let overview = state.onboarding.overview(id).await?;
    Ok(Json(overview))
}

//! Admin API endpoints for quota limits
//!
//! Every write drops the policy cache so the change applies to the next
//! decision served by this instance.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::api::handlers::ApiResult;
use crate::api::server::AppState;
use crate::error::EntitlementError;
use crate::quota::{EffectiveLimit, LimitType};

#[derive(Debug, Deserialize)]
pub struct SetLimitRequest {
    pub limit_value: i64,
}

#[derive(Debug, Serialize)]
pub struct LimitsResponse {
    pub limits: Vec<EffectiveLimit>,
}

#[derive(Debug, Serialize)]
pub struct RemoveLimitResponse {
    pub limit_type: LimitType,
    pub removed: bool,
    pub effective: EffectiveLimit,
}

fn parse_limit_type(raw: &str) -> Result<LimitType, EntitlementError> {
    LimitType::from_db_string(raw)
        .ok_or_else(|| EntitlementError::InvalidRequest(format!("unknown limit type '{}'", raw)))
}

async fn effective(state: &AppState, limit_type: LimitType) -> Result<EffectiveLimit, EntitlementError> {
    state
        .engine
        .policy()
        .effective_limits()
        .await?
        .into_iter()
        .find(|l| l.limit_type == limit_type)
        .ok_or_else(|| EntitlementError::NotFound(format!("limit {}", limit_type)))
}

/// GET /api/admin/limits - Effective limit for every type
pub async fn list_limits(State(state): State<Arc<AppState>>) -> ApiResult<LimitsResponse> {
    let limits = state.engine.policy().effective_limits().await?;
    Ok(Json(LimitsResponse { limits }))
}

/// PUT /api/admin/limits/:limit_type
pub async fn set_limit(
    State(state): State<Arc<AppState>>,
    Path(limit_type): Path<String>,
    Json(req): Json<SetLimitRequest>,
) -> ApiResult<EffectiveLimit> {
    let limit_type = parse_limit_type(&limit_type)?;
    let limit_value = u32::try_from(req.limit_value).map_err(|_| {
        EntitlementError::InvalidRequest(format!(
            "limit_value must be between 0 and {}, got {}",
            u32::MAX,
            req.limit_value
        ))
    })?;

    state.limits.set_limit(limit_type, limit_value).await?;
    state.engine.policy().invalidate().await;

    Ok(Json(effective(&state, limit_type).await?))
}

/// DELETE /api/admin/limits/:limit_type - Revert to the default
pub async fn remove_limit(
    State(state): State<Arc<AppState>>,
    Path(limit_type): Path<String>,
) -> ApiResult<RemoveLimitResponse> {
    let limit_type = parse_limit_type(&limit_type)?;

    let removed = state.limits.remove_limit(limit_type).await?;
    state.engine.policy().invalidate().await;

    Ok(Json(RemoveLimitResponse {
        limit_type,
        removed,
        effective: effective(&state, limit_type).await?,
    }))
}

/// POST /api/admin/limits/invalidate - Pick up out-of-band edits now
pub async fn invalidate_limits(State(state): State<Arc<AppState>>) -> ApiResult<LimitsResponse> {
    state.engine.policy().invalidate().await;
    info!("Quota limit cache invalidated by admin");

    let limits = state.engine.policy().effective_limits().await?;
    Ok(Json(LimitsResponse { limits }))
}

//! API request handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, warn};

use crate::access::{AccessDecision, AccessRequest, UsageSummary};
use crate::api::server::AppState;
use crate::error::EntitlementError;
use crate::payments::{
    CreateOrderRequest, CreateOrderResponse, SubscriptionCheck, UserSubscriptions,
    VerifyPaymentRequest, VerifyPaymentResponse,
};

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    /// Failing backing store, on 503
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
}

impl ApiError {
    pub fn new(msg: &str) -> Self {
        Self {
            error: msg.to_string(),
            store: None,
        }
    }
}

/// Handler error; maps domain errors to status codes
#[derive(Debug)]
pub struct ApiFailure(pub EntitlementError);

impl From<EntitlementError> for ApiFailure {
    fn from(err: EntitlementError) -> Self {
        ApiFailure(err)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let err = self.0;

        if err.is_service_fault() {
            error!(error = %err, store = ?err.store(), "Entitlement store fault");
            let body = ApiError {
                error: "Entitlement service unavailable".to_string(),
                store: err.store().map(|s| s.as_str().to_string()),
            };
            return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
        }

        let status = match &err {
            EntitlementError::InvalidRequest(_) | EntitlementError::InvalidPlan(_) => {
                StatusCode::BAD_REQUEST
            }
            EntitlementError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "Request failed");
        } else {
            warn!(error = %err, status = status.as_u16(), "Request rejected");
        }

        (status, Json(ApiError::new(&err.to_string()))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<Json<T>, ApiFailure>;

/// GET /health - Liveness plus database reachability
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_healthy = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let status_code = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(serde_json::json!({
            "status": if db_healthy { "healthy" } else { "unhealthy" },
            "service": "entitlement-rs",
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "database": if db_healthy { "ok" } else { "failed" }
            }
        })),
    )
}

/// POST /api/access/check - Decide and consume
pub async fn check_access(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AccessRequest>,
) -> ApiResult<AccessDecision> {
    let decision = state.engine.check_and_consume(&req).await?;
    Ok(Json(decision))
}

/// GET /api/access/usage/:user_id
pub async fn usage_summary(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<UsageSummary> {
    Ok(Json(state.engine.usage_summary(&user_id).await?))
}

/// POST /api/subscriptions/create-order
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> ApiResult<CreateOrderResponse> {
    let order = state.payments.create_order(&req).await?;
    Ok(Json(CreateOrderResponse::from(&order)))
}

/// POST /api/subscriptions/verify-payment
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyPaymentRequest>,
) -> ApiResult<VerifyPaymentResponse> {
    let subscription = state.payments.verify_payment(&req).await?;
    Ok(Json(VerifyPaymentResponse::from(&subscription)))
}

/// GET /api/subscriptions/user/:user_id
pub async fn user_subscriptions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<UserSubscriptions> {
    let subscriptions = state.payments.user_subscriptions(&user_id).await?;
    Ok(Json(UserSubscriptions {
        user_id,
        subscriptions,
    }))
}

/// GET /api/subscriptions/check/:user_id
pub async fn check_subscription(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<SubscriptionCheck> {
    Ok(Json(state.payments.check_subscription(&user_id).await?))
}

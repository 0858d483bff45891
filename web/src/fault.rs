//! Failure-injection control RPCs (test harness surface).

use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use uuid::Uuid;

/// Current failure-injection state.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultStatus {
    /// Whether the next broadcast creation will be marked for failure.
    pub armed: bool,
    /// Broadcasts currently marked for consumer failure.
    pub failing_broadcast_ids: Vec<Uuid>,
}

/// `POST /api/fault/arm`
///
/// # Errors
///
/// 500 when the shared region is unreachable.
pub async fn arm(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state
        .flags
        .arm()
        .await
        .map_err(|e| ApiError::from_classified(&e, "/api/fault/arm"))?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/fault/arm`
///
/// # Errors
///
/// 500 when the shared region is unreachable.
pub async fn disarm(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state
        .flags
        .disarm()
        .await
        .map_err(|e| ApiError::from_classified(&e, "/api/fault/arm"))?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/fault`
///
/// # Errors
///
/// 500 when the shared region is unreachable.
pub async fn status(State(state): State<AppState>) -> Result<Json<FaultStatus>, ApiError> {
    let armed = state
        .flags
        .is_armed()
        .await
        .map_err(|e| ApiError::from_classified(&e, "/api/fault"))?;
    let failing = state
        .flags
        .failing()
        .await
        .map_err(|e| ApiError::from_classified(&e, "/api/fault"))?;
    Ok(Json(FaultStatus {
        armed,
        failing_broadcast_ids: failing,
    }))
}

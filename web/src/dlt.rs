//! Dead-letter inspection, redrive, and purge RPCs.

use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use herald_orchestrator::RedriveSummary;
use serde::Serialize;
use uuid::Uuid;

/// One dead letter as listed to operators. The raw payload stays in the
/// store; operators redrive by id, not by editing payloads.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterView {
    /// Entry id.
    pub id: i64,
    /// The broadcast the failed event concerned.
    pub broadcast_id: Uuid,
    /// Partition key on the bus.
    pub original_key: Option<String>,
    /// Source topic.
    pub original_topic: String,
    /// Source partition.
    pub original_partition: i32,
    /// Source offset.
    pub original_offset: i64,
    /// Why processing gave up.
    pub exception_message: String,
    /// Correlation id of the failed event.
    pub correlation_id: String,
    /// When retries were exhausted.
    pub failed_at: DateTime<Utc>,
}

/// `GET /api/dlt`
///
/// # Errors
///
/// 500 on store failure.
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<DeadLetterView>>, ApiError> {
    let records = state
        .redrive
        .list(500)
        .await
        .map_err(|e| ApiError::from_classified(&e, "/api/dlt"))?;

    Ok(Json(
        records
            .into_iter()
            .map(|r| DeadLetterView {
                id: r.id,
                broadcast_id: r.broadcast_id,
                original_key: r.original_key,
                original_topic: r.original_topic,
                original_partition: r.original_partition,
                original_offset: r.original_offset,
                exception_message: r.exception_message,
                correlation_id: r.correlation_id,
                failed_at: r.failed_at,
            })
            .collect(),
    ))
}

/// `POST /api/dlt/{id}/redrive`
///
/// # Errors
///
/// 404 for an unknown record, 400 when the broadcast is terminal.
pub async fn redrive(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let path = format!("/api/dlt/{id}/redrive");
    state
        .redrive
        .redrive(id)
        .await
        .map_err(|e| ApiError::from_classified(&e, path))?;
    Ok(StatusCode::ACCEPTED)
}

/// `POST /api/dlt/redrive-all`
///
/// # Errors
///
/// 500 only when the listing itself fails; per-record failures land in the
/// summary.
pub async fn redrive_all(State(state): State<AppState>) -> Result<Json<RedriveSummary>, ApiError> {
    let summary = state
        .redrive
        .redrive_all()
        .await
        .map_err(|e| ApiError::from_classified(&e, "/api/dlt/redrive-all"))?;
    Ok(Json(summary))
}

/// `DELETE /api/dlt/{id}`
///
/// # Errors
///
/// 404 for an unknown record.
pub async fn purge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let path = format!("/api/dlt/{id}");
    let existed = state
        .redrive
        .purge(id)
        .await
        .map_err(|e| ApiError::from_classified(&e, path.clone()))?;
    if existed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(
            format!("dead-letter record {id}"),
            path,
        ))
    }
}

/// Purge-all response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeAllResponse {
    /// Records removed.
    pub purged: u64,
}

/// `DELETE /api/dlt`
///
/// # Errors
///
/// 500 on store failure.
pub async fn purge_all(State(state): State<AppState>) -> Result<Json<PurgeAllResponse>, ApiError> {
    let purged = state
        .redrive
        .purge_all()
        .await
        .map_err(|e| ApiError::from_classified(&e, "/api/dlt"))?;
    Ok(Json(PurgeAllResponse { purged }))
}

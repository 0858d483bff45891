//! Admin broadcast RPCs: create, cancel, list, stats.

use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use herald_core::broadcast::{Broadcast, BroadcastStatus, Priority, TargetType};
use herald_core::envelope::{EventEnvelope, EventKind};
use herald_core::outbox::OutboxEvent;
use herald_postgres::{BroadcastRepository, StatisticsRepository};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Create-broadcast request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBroadcastRequest {
    /// Authoring administrator id.
    pub sender_id: String,
    /// Authoring administrator display name.
    pub sender_name: String,
    /// Message body.
    pub content: String,
    /// Targeting mode.
    pub target_type: TargetType,
    /// Recipient or role ids; empty/absent for `ALL`.
    #[serde(default)]
    pub target_ids: Vec<String>,
    /// Delivery urgency.
    #[serde(default)]
    pub priority: Priority,
    /// Free-form category label.
    #[serde(default)]
    pub category: Option<String>,
    /// Activation time; absent means immediately.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Expiry time; absent means never.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Expire after the first successful delivery.
    #[serde(default)]
    pub fire_and_forget: bool,
    /// Correlation id; generated when absent.
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// Create-broadcast response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBroadcastResponse {
    /// The new broadcast's id.
    pub id: Uuid,
    /// Recipients the broadcast resolves to right now.
    pub total_targeted: usize,
}

/// `POST /api/broadcasts`
///
/// Validates, resolves the target population (503 when the directory is
/// down, nothing is persisted), consumes the failure-injection armed flag,
/// and persists the broadcast together with its `BROADCAST.CREATED` event
/// in one transaction. Scheduled broadcasts persist without an event; the
/// activator emits it when due.
///
/// # Errors
///
/// 400 on validation failure, 503 on directory outage, 500 on store
/// failure.
pub async fn create_broadcast(
    State(state): State<AppState>,
    Json(request): Json<CreateBroadcastRequest>,
) -> Result<(StatusCode, Json<CreateBroadcastResponse>), ApiError> {
    const PATH: &str = "/api/broadcasts";
    let now = Utc::now();

    let broadcast = Broadcast {
        id: Uuid::new_v4(),
        sender_id: request.sender_id,
        sender_name: request.sender_name,
        content: request.content,
        target_type: request.target_type,
        target_ids: request.target_ids,
        priority: request.priority,
        category: request.category,
        scheduled_at: request.scheduled_at,
        expires_at: request.expires_at,
        fire_and_forget: request.fire_and_forget,
        correlation_id: request
            .correlation_id
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        status: BroadcastStatus::Scheduled,
        created_at: now,
        updated_at: now,
    };
    broadcast
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string(), PATH))?;
    if broadcast.expires_at.is_some_and(|at| at <= now) {
        return Err(ApiError::bad_request("expires_at is in the past", PATH));
    }

    // Resolve now so the response can carry totalTargeted; a directory
    // outage aborts creation with nothing persisted.
    let recipients = state
        .directory
        .resolve(broadcast.target_type, &broadcast.target_ids)
        .await
        .map_err(|e| ApiError::from_classified(&e, PATH))?;

    // One armed flag fails exactly one broadcast (C10).
    let armed = state
        .flags
        .consume_armed()
        .await
        .map_err(|e| ApiError::from_classified(&e, PATH))?;
    if armed {
        state
            .flags
            .mark_failing(broadcast.id)
            .await
            .map_err(|e| ApiError::from_classified(&e, PATH))?;
    }

    let immediate = broadcast.is_immediate(now);
    let mut broadcast = broadcast;
    if immediate {
        broadcast.status = BroadcastStatus::Active;
    }

    let events = if immediate {
        let envelope = EventEnvelope::new(
            EventKind::BroadcastCreated,
            broadcast.id,
            now,
            &broadcast.correlation_id,
        );
        vec![
            OutboxEvent::from_envelope(&state.topic, &envelope)
                .map_err(|e| ApiError::internal(e.to_string(), PATH))?,
        ]
    } else {
        Vec::new()
    };

    let stored = broadcast.clone();
    state
        .outbox
        .publish_with_state(&events, move |conn| {
            Box::pin(async move {
                BroadcastRepository::insert(conn, &stored).await?;
                StatisticsRepository::ensure(conn, stored.id, now).await?;
                Ok(())
            })
        })
        .await
        .map_err(|e| ApiError::from_classified(&e, PATH))?;

    tracing::info!(
        broadcast_id = %broadcast.id,
        target_type = broadcast.target_type.as_str(),
        total_targeted = recipients.len(),
        immediate = immediate,
        fire_and_forget = broadcast.fire_and_forget,
        "Broadcast created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateBroadcastResponse {
            id: broadcast.id,
            total_targeted: recipients.len(),
        }),
    ))
}

/// `DELETE /api/broadcasts/{id}`
///
/// Cancels a broadcast: terminal status and the `BROADCAST.CANCELLED`
/// event in one transaction. The consumer supersedes pending rows and
/// notifies connected nodes.
///
/// # Errors
///
/// 404 for an unknown id, 409 when the broadcast is already terminal.
pub async fn cancel_broadcast(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let path = format!("/api/broadcasts/{id}");
    let now = Utc::now();

    let broadcast = state
        .broadcasts
        .get(id)
        .await
        .map_err(|e| ApiError::from_classified(&e, path.clone()))?;
    if broadcast.status.is_terminal() {
        return Err(ApiError::conflict(
            format!("broadcast is already {}", broadcast.status),
            path,
        ));
    }

    let envelope = EventEnvelope::new(
        EventKind::BroadcastCancelled,
        id,
        now,
        &broadcast.correlation_id,
    );
    let event = OutboxEvent::from_envelope(&state.topic, &envelope)
        .map_err(|e| ApiError::internal(e.to_string(), path.clone()))?;

    state
        .outbox
        .publish_with_state(std::slice::from_ref(&event), move |conn| {
            Box::pin(async move {
                BroadcastRepository::advance_status(conn, id, BroadcastStatus::Cancelled, now)
                    .await?;
                Ok(())
            })
        })
        .await
        .map_err(|e| ApiError::from_classified(&e, path))?;

    tracing::info!(broadcast_id = %id, "Broadcast cancelled");
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/broadcasts`
///
/// # Errors
///
/// 500 on store failure.
pub async fn list_broadcasts(
    State(state): State<AppState>,
) -> Result<Json<Vec<Broadcast>>, ApiError> {
    let broadcasts = state
        .broadcasts
        .list(200)
        .await
        .map_err(|e| ApiError::from_classified(&e, "/api/broadcasts"))?;
    Ok(Json(broadcasts))
}

/// Stats response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    /// Delivery rows materialized at fan-out.
    pub total_targeted: i64,
    /// First delivered transitions.
    pub total_delivered: i64,
    /// First read transitions.
    pub total_read: i64,
    /// First failed transitions.
    pub total_failed: i64,
    /// `total_delivered / total_targeted`, zero-guarded.
    pub delivery_rate: f64,
    /// `total_read / total_delivered`, zero-guarded.
    pub read_rate: f64,
    /// Mean delivery latency in milliseconds.
    pub avg_delivery_time_ms: f64,
}

/// `GET /api/broadcasts/{id}/stats`
///
/// # Errors
///
/// 404 for an unknown id.
pub async fn broadcast_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatsResponse>, ApiError> {
    let path = format!("/api/broadcasts/{id}/stats");
    let stats = state
        .statistics
        .get(id)
        .await
        .map_err(|e| ApiError::from_classified(&e, path))?;

    Ok(Json(StatsResponse {
        total_targeted: stats.total_targeted,
        total_delivered: stats.total_delivered,
        total_read: stats.total_read,
        total_failed: stats.total_failed,
        delivery_rate: stats.delivery_rate(),
        read_rate: stats.read_rate(),
        avg_delivery_time_ms: stats.avg_delivery_time_ms,
    }))
}

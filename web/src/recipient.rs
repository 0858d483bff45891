//! Recipient RPCs: the SSE push stream, inbox reads, read
//! acknowledgement, and preferences.

use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::Utc;
use futures::Stream;
use herald_core::envelope::{EventEnvelope, EventKind};
use herald_core::inbox::InboxEntry;
use herald_core::outbox::OutboxEvent;
use herald_core::preferences::RecipientPreferences;
use herald_push::PushSessionManager;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;

/// Closes the push connection when the SSE stream is dropped (client went
/// away or the response ended).
struct ConnectionGuard {
    push: Arc<PushSessionManager>,
    connection_id: Uuid,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let push = Arc::clone(&self.push);
        let connection_id = self.connection_id;
        tokio::spawn(async move {
            push.close(connection_id, "stream dropped").await;
        });
    }
}

/// `GET /api/recipients/{id}/stream`
///
/// The long-lived server-push channel. Emits `CONNECTED`, then the pending
/// catch-up `MESSAGE`s, then live frames; each SSE event's name is the
/// frame type and its data the `{type, timestamp, data}` JSON.
///
/// # Errors
///
/// 503 while the node is draining (clients reconnect elsewhere).
pub async fn stream(
    State(state): State<AppState>,
    Path(recipient_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let path = format!("/api/recipients/{recipient_id}/stream");
    let (connection_id, mut frames) = state
        .push
        .connect(&recipient_id)
        .await
        .map_err(|e| ApiError::from_classified(&e, path))?;

    let guard = ConnectionGuard {
        push: Arc::clone(&state.push),
        connection_id,
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(frame) = frames.recv().await {
            let event = match serde_json::to_string(&frame) {
                Ok(json) => Event::default().event(frame.kind.as_str()).data(json),
                Err(e) => {
                    tracing::error!(error = %e, "Frame serialization failed");
                    continue;
                }
            };
            yield Ok(event);
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// `GET /api/recipients/{id}/messages`: full history (active and expired
/// broadcasts), newest first.
///
/// # Errors
///
/// 500 on store failure.
pub async fn messages(
    State(state): State<AppState>,
    Path(recipient_id): Path<String>,
) -> Result<Json<Vec<InboxEntry>>, ApiError> {
    let path = format!("/api/recipients/{recipient_id}/messages");
    let rows = state
        .deliveries
        .messages_for(&recipient_id)
        .await
        .map_err(|e| ApiError::from_classified(&e, path))?;
    Ok(Json(rows.iter().map(herald_postgres::InboxRow::to_entry).collect()))
}

/// `GET /api/recipients/{id}/messages/unread`: unread messages of active
/// broadcasts.
///
/// # Errors
///
/// 500 on store failure.
pub async fn unread(
    State(state): State<AppState>,
    Path(recipient_id): Path<String>,
) -> Result<Json<Vec<InboxEntry>>, ApiError> {
    let path = format!("/api/recipients/{recipient_id}/messages/unread");
    let rows = state
        .deliveries
        .unread_for(&recipient_id)
        .await
        .map_err(|e| ApiError::from_classified(&e, path))?;
    Ok(Json(rows.iter().map(herald_postgres::InboxRow::to_entry).collect()))
}

/// `GET /api/recipients/{id}/messages/active`: messages of currently
/// active broadcasts, served through the shared inbox cache so a
/// reconnecting recipient pulls fast on any node.
///
/// # Errors
///
/// 500 on store failure.
pub async fn active(
    State(state): State<AppState>,
    Path(recipient_id): Path<String>,
) -> Result<Json<Vec<InboxEntry>>, ApiError> {
    let path = format!("/api/recipients/{recipient_id}/messages/active");

    // Cache first; a miss (or a cache outage) falls back to the database
    // and refills.
    match state.cache.entries(&recipient_id).await {
        Ok(Some(entries)) => return Ok(Json(entries)),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(recipient_id = %recipient_id, error = %e, "Inbox cache read failed");
        }
    }

    let rows = state
        .deliveries
        .active_for(&recipient_id)
        .await
        .map_err(|e| ApiError::from_classified(&e, path))?;
    let entries: Vec<InboxEntry> = rows.iter().map(herald_postgres::InboxRow::to_entry).collect();

    if let Err(e) = state.cache.fill(&recipient_id, &entries).await {
        tracing::warn!(recipient_id = %recipient_id, error = %e, "Inbox cache fill failed");
    }
    Ok(Json(entries))
}

/// `POST /api/recipients/{id}/messages/{broadcastId}/read`
///
/// Acknowledges a message. The acknowledgement travels the same durable
/// path as every other state change: a `DELIVERY.READ` envelope through
/// the outbox, keyed by the recipient.
///
/// # Errors
///
/// 404 when no delivery row exists for the pair.
pub async fn mark_read(
    State(state): State<AppState>,
    Path((recipient_id, broadcast_id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let path = format!("/api/recipients/{recipient_id}/messages/{broadcast_id}/read");

    let delivery = state
        .deliveries
        .get(broadcast_id, &recipient_id)
        .await
        .map_err(|e| ApiError::from_classified(&e, path.clone()))?;
    if !delivery.can_mark_read() {
        return Ok(StatusCode::NO_CONTENT); // Already read; acknowledging again is fine.
    }

    let broadcast = state
        .broadcasts
        .get(broadcast_id)
        .await
        .map_err(|e| ApiError::from_classified(&e, path.clone()))?;

    let envelope = EventEnvelope::new(
        EventKind::DeliveryRead,
        broadcast_id,
        Utc::now(),
        &broadcast.correlation_id,
    )
    .for_recipient(&recipient_id);
    let event = OutboxEvent::from_envelope(&state.topic, &envelope)
        .map_err(|e| ApiError::internal(e.to_string(), path.clone()))?;

    state
        .outbox
        .publish_with_state(std::slice::from_ref(&event), |_conn| {
            Box::pin(async { Ok(()) })
        })
        .await
        .map_err(|e| ApiError::from_classified(&e, path))?;

    Ok(StatusCode::ACCEPTED)
}

/// Preferences request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesRequest {
    /// Categories whose live pushes are suppressed.
    #[serde(default)]
    pub muted_categories: Vec<String>,
}

/// `GET /api/recipients/{id}/preferences`
///
/// # Errors
///
/// 500 on store failure.
pub async fn get_preferences(
    State(state): State<AppState>,
    Path(recipient_id): Path<String>,
) -> Result<Json<RecipientPreferences>, ApiError> {
    let path = format!("/api/recipients/{recipient_id}/preferences");
    let prefs = state
        .preferences
        .get(&recipient_id, Utc::now())
        .await
        .map_err(|e| ApiError::from_classified(&e, path))?;
    Ok(Json(prefs))
}

/// `PUT /api/recipients/{id}/preferences`
///
/// # Errors
///
/// 500 on store failure.
pub async fn put_preferences(
    State(state): State<AppState>,
    Path(recipient_id): Path<String>,
    Json(request): Json<PreferencesRequest>,
) -> Result<Json<RecipientPreferences>, ApiError> {
    let path = format!("/api/recipients/{recipient_id}/preferences");
    let prefs = RecipientPreferences {
        recipient_id: recipient_id.clone(),
        muted_categories: request.muted_categories,
        updated_at: Utc::now(),
    };
    state
        .preferences
        .upsert(&prefs)
        .await
        .map_err(|e| ApiError::from_classified(&e, path))?;
    Ok(Json(prefs))
}

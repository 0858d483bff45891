//! Axum surface for Herald.
//!
//! Two route families:
//!
//! - **Admin** (`/api/broadcasts`, `/api/dlt`, `/api/fault`): create,
//!   cancel, list, and inspect broadcasts; dead-letter inspection and
//!   redrive; failure-injection control.
//! - **Recipient** (`/api/recipients/{id}/...`): the long-lived SSE push
//!   stream, inbox reads, read acknowledgement, preferences.
//!
//! Validation failures are 400s with the
//! `{timestamp, status, error, message, path}` envelope and no side
//! effects; absent resources are 404s; a directory outage during creation
//! is a 503 so the caller retries.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod dlt;
pub mod error;
pub mod fault;
pub mod recipient;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

/// Assemble the full router over the shared state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Admin: broadcasts
        .route(
            "/api/broadcasts",
            post(admin::create_broadcast).get(admin::list_broadcasts),
        )
        .route("/api/broadcasts/:id", delete(admin::cancel_broadcast))
        .route("/api/broadcasts/:id/stats", get(admin::broadcast_stats))
        // Admin: dead letters
        .route("/api/dlt", get(dlt::list).delete(dlt::purge_all))
        .route("/api/dlt/:id", delete(dlt::purge))
        .route("/api/dlt/:id/redrive", post(dlt::redrive))
        .route("/api/dlt/redrive-all", post(dlt::redrive_all))
        // Admin: failure injection
        .route("/api/fault", get(fault::status))
        .route("/api/fault/arm", post(fault::arm).delete(fault::disarm))
        // Recipients
        .route("/api/recipients/:id/stream", get(recipient::stream))
        .route("/api/recipients/:id/messages", get(recipient::messages))
        .route(
            "/api/recipients/:id/messages/unread",
            get(recipient::unread),
        )
        .route(
            "/api/recipients/:id/messages/active",
            get(recipient::active),
        )
        .route(
            "/api/recipients/:id/messages/:broadcast_id/read",
            post(recipient::mark_read),
        )
        .route(
            "/api/recipients/:id/preferences",
            get(recipient::get_preferences).put(recipient::put_preferences),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

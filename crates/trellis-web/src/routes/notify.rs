//! Externally triggered notifications.

use axum::{extract::rejection::JsonRejection, extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use trellis_core::notifier::{NotifyAck, NotifyRequest};

use crate::state::AppState;

type ApiError = (StatusCode, Json<Value>);

fn bad_request(reason: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": reason })))
}

/// Persist a notification and broadcast it to every WebSocket client.
pub async fn notify(
    State(state): State<AppState>,
    body: Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<Json<NotifyAck>, ApiError> {
    let Json(req) = body.map_err(|e| {
        debug!(error = %e, "Rejected notify body");
        bad_request("Invalid notification data")
    })?;
    if req.user_id.trim().is_empty() || req.message.trim().is_empty() {
        return Err(bad_request("user_id and message are required"));
    }

    let notification = state
        .dispatcher
        .dispatch(req.user_id, req.message)
        .await
        .map_err(|e| {
            warn!(error = %e, "Notification could not be persisted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Notification could not be sent" })),
            )
        })?;

    info!(id = %notification.id, user_id = %notification.user_id, "Notification accepted");
    Ok(Json(NotifyAck {
        message: "Notification sent".to_string(),
    }))
}

//! Notification management endpoints. Every route acts on the caller's own rows.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value as JsonValue};

use kindred_core::{Notification, NotificationStatus};

use crate::auth::RequireUser;
use crate::error::ApiError;
use crate::state::AppState;

/// `GET /api/notifications`
pub async fn list_notifications(
    State(state): State<AppState>,
    user: RequireUser,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let rows = state.manager.list(Some(&user.user_id)).await?;
    Ok(Json(rows))
}

/// `POST /api/notifications/:event_id/read`
pub async fn mark_read(
    State(state): State<AppState>,
    user: RequireUser,
    Path(event_id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let outcome = state.manager.mark_read(Some(&user.user_id), &event_id).await?;
    Ok(Json(json!({
        "eventId": event_id,
        "status": NotificationStatus::Read,
        "outcome": outcome,
    })))
}

/// `POST /api/notifications/:event_id/unread`
pub async fn mark_unread(
    State(state): State<AppState>,
    user: RequireUser,
    Path(event_id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let outcome = state
        .manager
        .mark_unread(Some(&user.user_id), &event_id)
        .await?;
    Ok(Json(json!({
        "eventId": event_id,
        "status": NotificationStatus::Unread,
        "outcome": outcome,
    })))
}

/// `DELETE /api/notifications/:event_id`
pub async fn delete_notification(
    State(state): State<AppState>,
    user: RequireUser,
    Path(event_id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    state.manager.delete(Some(&user.user_id), &event_id).await?;
    Ok(Json(json!({ "eventId": event_id, "deleted": true })))
}

/// `POST /api/notifications/read-all`
pub async fn mark_all_read(
    State(state): State<AppState>,
    user: RequireUser,
) -> Result<Json<JsonValue>, ApiError> {
    let changed = state.manager.mark_all_read(Some(&user.user_id)).await?;
    Ok(Json(json!({ "count": changed.len(), "eventIds": changed })))
}

/// `POST /api/notifications/unread-batch` with a JSON array of event ids.
pub async fn mark_unread_batch(
    State(state): State<AppState>,
    user: RequireUser,
    body: Result<Json<Vec<String>>, JsonRejection>,
) -> Result<Json<JsonValue>, ApiError> {
    let Json(event_ids) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let changed = state
        .manager
        .mark_unread_batch(Some(&user.user_id), &event_ids)
        .await?;
    Ok(Json(json!({ "count": changed.len(), "eventIds": changed })))
}

/// `DELETE /api/notifications/read`
pub async fn delete_all_read(
    State(state): State<AppState>,
    user: RequireUser,
) -> Result<Json<JsonValue>, ApiError> {
    let deleted = state.manager.delete_all_read(Some(&user.user_id)).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

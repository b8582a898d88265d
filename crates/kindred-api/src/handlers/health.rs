use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// `GET /health`: liveness plus dispatch queue depth.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let ws_connections = state.ws_connections.load(Ordering::Relaxed);
    match state.broker.depth(&state.queue).await {
        Ok(depth) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "queue": state.queue,
                "queueDepth": depth,
                "wsConnections": ws_connections,
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, queue = %state.queue, "Health check could not read queue depth");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "version": env!("CARGO_PKG_VERSION"),
                    "queue": state.queue,
                    "error": e.to_string(),
                })),
            )
        }
    }
}

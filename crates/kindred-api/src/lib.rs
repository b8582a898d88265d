//! # kindred-api
//!
//! HTTP and WebSocket surface for kindred tree notifications:
//! - `GET /api/ws` live channel with unread backlog replay on subscribe
//! - `/api/notifications` management routes for the authenticated user
//! - `GET /health` with dispatch queue depth

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod state;
pub mod ws;

use axum::routing::{delete, get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub use auth::{Claims, RequireUser, TokenVerifier};
pub use config::ApiConfig;
pub use error::ApiError;
pub use state::AppState;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/ws", get(ws::ws_handler))
        .route("/api/notifications", get(handlers::list_notifications))
        .route("/api/notifications/read-all", post(handlers::mark_all_read))
        .route(
            "/api/notifications/unread-batch",
            post(handlers::mark_unread_batch),
        )
        .route("/api/notifications/read", delete(handlers::delete_all_read))
        .route(
            "/api/notifications/:event_id",
            delete(handlers::delete_notification),
        )
        .route("/api/notifications/:event_id/read", post(handlers::mark_read))
        .route(
            "/api/notifications/:event_id/unread",
            post(handlers::mark_unread),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

//! WebSocket endpoint for live notifications.
//!
//! Clients connect to `/api/ws` with a token, then send
//! `{"type":"SUBSCRIBE","destination":"/user/queue/notifications"}`. The
//! server answers `SUBSCRIBED`, replays the unread backlog, and from then on
//! forwards every live notification addressed to the user as a `MESSAGE`
//! frame. Frames for other users never leave the server.
//!
//! The backlog arrives through the session's own [`SessionOutbox`], so replay
//! is paced by the socket. If the session falls behind the shared live bus it
//! asks for the backlog again; rows it missed are still UNREAD.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use kindred_core::{
    defaults, new_v7, user_destination, ChannelEvent, LiveNotification, SessionOutbox,
    USER_QUEUE_DESTINATION,
};

use crate::auth::bearer_token;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientFrame {
    Subscribe { destination: String },
    Unsubscribe { destination: String },
}

/// Frames sent by the server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerFrame {
    Subscribed {
        destination: String,
    },
    Unsubscribed {
        destination: String,
    },
    Message {
        destination: String,
        body: LiveNotification,
    },
    Error {
        message: String,
    },
}

impl ServerFrame {
    fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::Text(json)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode WebSocket frame");
                None
            }
        }
    }
}

fn accepts_destination(user_id: &str, destination: &str) -> bool {
    destination == USER_QUEUE_DESTINATION || destination == user_destination(user_id)
}

/// `GET /api/ws`: authenticate, then upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| bearer_token(&headers))
        .ok_or_else(|| {
            tracing::warn!("WebSocket connection attempt without token");
            ApiError::Unauthorized("Authentication required".to_string())
        })?;

    let user_id = state.verifier.verify(token).map_err(|e| {
        tracing::warn!(error = %e, "WebSocket token validation failed");
        ApiError::from(e)
    })?;

    Ok(ws.on_upgrade(move |socket| handle_ws_connection(socket, state, user_id)))
}

async fn handle_ws_connection(socket: WebSocket, state: AppState, user_id: String) {
    let session_id = new_v7();
    let count = state.ws_connections.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::info!(
        session_id = %session_id,
        recipient = %user_id,
        active = count,
        "WebSocket connection opened"
    );

    let (mut sender, mut receiver) = socket.split();
    // Subscribe before any SUBSCRIBE frame can trigger a replay
    let mut live = BroadcastStream::new(state.live.subscribe());
    let subscribed = Arc::new(AtomicBool::new(false));
    let (control_tx, mut control_rx) = mpsc::channel::<ServerFrame>(16);
    let (outbox, mut replay_rx) = SessionOutbox::channel(defaults::SESSION_OUTBOX_CAPACITY);
    let destination = user_destination(&user_id);

    // Forward control frames, replayed rows, and this user's live
    // notifications to the client
    let send_task = {
        let user_id = user_id.clone();
        let subscribed = subscribed.clone();
        let subscriptions = state.subscriptions.clone();
        let outbox = outbox.clone();
        tokio::spawn(async move {
            let mut ping_interval =
                tokio::time::interval(Duration::from_secs(defaults::WS_PING_INTERVAL_SECS));
            loop {
                let frame = tokio::select! {
                    biased;
                    control = control_rx.recv() => match control {
                        Some(frame) => frame,
                        None => break,
                    },
                    replayed = replay_rx.recv() => match replayed {
                        Some(body) if subscribed.load(Ordering::Acquire) => ServerFrame::Message {
                            destination: destination.clone(),
                            body,
                        },
                        Some(_) => continue,
                        None => break,
                    },
                    item = live.next() => match item {
                        Some(Ok(msg)) => {
                            if msg.user_id != user_id || !subscribed.load(Ordering::Acquire) {
                                continue;
                            }
                            ServerFrame::Message {
                                destination: msg.destination,
                                body: msg.payload,
                            }
                        }
                        Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
                            if subscribed.load(Ordering::Acquire) {
                                tracing::warn!(
                                    session_id = %session_id,
                                    recipient = %user_id,
                                    missed = n,
                                    "WebSocket session lagged, replaying unread backlog"
                                );
                                subscriptions
                                    .emit(ChannelEvent::Subscribed {
                                        session_id,
                                        user_id: user_id.clone(),
                                        destination: destination.clone(),
                                        outbox: outbox.clone(),
                                    })
                                    .await;
                            }
                            continue;
                        }
                        None => break,
                    },
                    _ = ping_interval.tick() => {
                        if sender.send(Message::Ping(vec![])).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };
                let Some(message) = frame.to_message() else {
                    continue;
                };
                if sender.send(message).await.is_err() {
                    break;
                }
            }
        })
    };

    // Handle client frames
    let recv_task = {
        let user_id = user_id.clone();
        let subscriptions = state.subscriptions.clone();
        tokio::spawn(async move {
            while let Some(Ok(msg)) = receiver.next().await {
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let (reply, event) = match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => {
                        handle_client_frame(frame, session_id, &user_id, &subscribed, &outbox)
                    }
                    Err(e) => (
                        ServerFrame::Error {
                            message: format!("unrecognised frame: {}", e),
                        },
                        None,
                    ),
                };
                // Acknowledge before the listener can start replaying
                if control_tx.send(reply).await.is_err() {
                    break;
                }
                if let Some(event) = event {
                    subscriptions.emit(event).await;
                }
            }
        })
    };

    // Wait for either task to finish
    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    state
        .subscriptions
        .emit(ChannelEvent::Disconnected {
            session_id,
            user_id: user_id.clone(),
        })
        .await;
    let count = state.ws_connections.fetch_sub(1, Ordering::Relaxed) - 1;
    tracing::info!(
        session_id = %session_id,
        recipient = %user_id,
        active = count,
        "WebSocket connection closed"
    );
}

/// Apply a client frame to the session; returns the reply and the lifecycle
/// event to publish once the reply is queued.
fn handle_client_frame(
    frame: ClientFrame,
    session_id: Uuid,
    user_id: &str,
    subscribed: &AtomicBool,
    outbox: &SessionOutbox,
) -> (ServerFrame, Option<ChannelEvent>) {
    match frame {
        ClientFrame::Subscribe { destination } => {
            if !accepts_destination(user_id, &destination) {
                tracing::debug!(recipient = %user_id, destination = %destination, "Rejected subscription");
                let reply = ServerFrame::Error {
                    message: format!("cannot subscribe to {}", destination),
                };
                return (reply, None);
            }
            subscribed.store(true, Ordering::Release);
            let reply = ServerFrame::Subscribed {
                destination: user_destination(user_id),
            };
            let event = ChannelEvent::Subscribed {
                session_id,
                user_id: user_id.to_string(),
                destination,
                outbox: outbox.clone(),
            };
            (reply, Some(event))
        }
        ClientFrame::Unsubscribe { destination } => {
            subscribed.store(false, Ordering::Release);
            let reply = ServerFrame::Unsubscribed {
                destination: user_destination(user_id),
            };
            let event = ChannelEvent::Unsubscribed {
                session_id,
                user_id: user_id.to_string(),
                destination,
            };
            (reply, Some(event))
        }
    }
}

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use kindred_core::{MessageBroker, NotificationBus, NotificationRepository, SubscriptionBus};
use kindred_dispatch::NotificationManager;

use crate::auth::TokenVerifier;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: NotificationManager,
    /// Used by `/health` for queue depth.
    pub broker: Arc<dyn MessageBroker>,
    pub queue: String,
    /// Live notifications fanned out to WebSocket sessions.
    pub live: NotificationBus,
    /// Session subscribe/disconnect events for backlog replay.
    pub subscriptions: SubscriptionBus,
    pub verifier: TokenVerifier,
    /// Active WebSocket connection count.
    pub ws_connections: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn NotificationRepository>,
        broker: Arc<dyn MessageBroker>,
        queue: impl Into<String>,
        live: NotificationBus,
        subscriptions: SubscriptionBus,
        verifier: TokenVerifier,
    ) -> Self {
        Self {
            manager: NotificationManager::new(store),
            broker,
            queue: queue.into(),
            live,
            subscriptions,
            verifier,
            ws_connections: Arc::new(AtomicUsize::new(0)),
        }
    }
}

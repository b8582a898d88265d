//! Shared setup for API tests: an `AppState` over in-memory doubles.

#![allow(dead_code)]

use std::sync::Arc;

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

use kindred_api::{AppState, Claims, TokenVerifier};
use kindred_core::memory::{InMemoryBroker, InMemoryNotificationRepository};
use kindred_core::{
    BrokerTopology, EventType, MessageBroker, NewNotification, NotificationBus,
    NotificationRepository, SubscriptionBus, SubscriptionEvents, TreeEvent,
};

pub const SECRET: &str = "test-secret";

// 2100-01-01
const FAR_FUTURE: usize = 4_102_444_800;

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<InMemoryNotificationRepository>,
    pub broker: Arc<InMemoryBroker>,
    /// Lifecycle events for a subscription listener, taken by whoever runs one.
    pub events: Option<SubscriptionEvents>,
}

pub async fn test_app() -> TestApp {
    test_app_with_live_capacity(64).await
}

pub async fn test_app_with_live_capacity(live_capacity: usize) -> TestApp {
    let store = Arc::new(InMemoryNotificationRepository::new());
    let broker = Arc::new(InMemoryBroker::new());
    let topology = BrokerTopology::default();
    broker.declare_topology(&topology).await.unwrap();

    let (subscriptions, events) = SubscriptionBus::channel(16);
    let state = AppState::new(
        store.clone(),
        broker.clone(),
        topology.queue,
        NotificationBus::new(live_capacity),
        subscriptions,
        TokenVerifier::new(SECRET),
    );
    TestApp {
        state,
        store,
        broker,
        events: Some(events),
    }
}

pub fn token_for(user_id: &str) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        &Claims {
            sub: user_id.to_string(),
            exp: FAR_FUTURE,
        },
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

/// Store an UNREAD notification for `recipient`; returns its event id.
pub async fn seed(store: &InMemoryNotificationRepository, recipient: &str, tree_id: &str) -> String {
    let event = TreeEvent::new(EventType::TreeStructureModified, tree_id, "actor")
        .with_tree_name("Smith family");
    store
        .insert_if_absent(&NewNotification::for_recipient(&event, recipient).unwrap())
        .await
        .unwrap();
    event.event_id().to_string()
}

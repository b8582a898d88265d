//! In-process channels connecting the dispatcher and the subscription
//! listener to WebSocket sessions.
//!
//! - [`NotificationBus`] fans freshly dispatched notifications out to every
//!   session; each session forwards only the messages addressed to its user.
//!   It is a `tokio::sync::broadcast` channel, so sends never block and a
//!   session that falls behind observes `RecvError::Lagged`. Lagging sessions
//!   recover by asking for a backlog replay, since every live notification is
//!   also stored UNREAD.
//! - [`SessionOutbox`] is one session's bounded queue for replayed rows.
//!   Replay waits for room, so a large backlog is never truncated.
//! - [`SubscriptionBus`] carries channel lifecycle events from sessions to the
//!   single subscription listener over a bounded `mpsc` queue. Emitters wait
//!   while the listener is behind; nothing is dropped.

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::notifications::{user_destination, LiveNotification};
use crate::traits::LiveChannel;

// ============================================================================
// Live notifications
// ============================================================================

/// A live notification addressed to one user.
#[derive(Debug, Clone)]
pub struct LiveMessage {
    pub user_id: String,
    /// `/user/<id>/queue/notifications`
    pub destination: String,
    pub payload: LiveNotification,
}

/// Fan-out sink for live notifications.
#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<LiveMessage>,
}

impl NotificationBus {
    /// Create a bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to every live message. Filter by `user_id` downstream.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveMessage> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl LiveChannel for NotificationBus {
    fn send(&self, user_id: &str, payload: &LiveNotification) {
        let message = LiveMessage {
            user_id: user_id.to_string(),
            destination: user_destination(user_id),
            payload: payload.clone(),
        };
        tracing::trace!(
            recipient = %user_id,
            event_id = %payload.id,
            subscriber_count = self.tx.receiver_count(),
            "NotificationBus send"
        );
        let _ = self.tx.send(message);
    }
}

// ============================================================================
// Session outbox
// ============================================================================

/// Bounded queue of replayed notifications for one WebSocket session.
#[derive(Debug, Clone)]
pub struct SessionOutbox {
    tx: mpsc::Sender<LiveNotification>,
}

impl SessionOutbox {
    /// Create an outbox and the receiver its session drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LiveNotification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue `payload`, waiting for room.
    ///
    /// Returns `false` once the session has gone away.
    pub async fn deliver(&self, payload: LiveNotification) -> bool {
        self.tx.send(payload).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PartialEq for SessionOutbox {
    fn eq(&self, other: &Self) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

impl Eq for SessionOutbox {}

// ============================================================================
// Channel lifecycle
// ============================================================================

/// Lifecycle of a user's live channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A session subscribed to `destination`; its backlog goes to `outbox`.
    Subscribed {
        session_id: Uuid,
        user_id: String,
        destination: String,
        outbox: SessionOutbox,
    },
    /// A session dropped a subscription.
    Unsubscribed {
        session_id: Uuid,
        user_id: String,
        destination: String,
    },
    /// A session closed.
    Disconnected { session_id: Uuid, user_id: String },
}

/// Receiving end of a [`SubscriptionBus`], owned by the listener.
pub type SubscriptionEvents = mpsc::Receiver<ChannelEvent>;

/// Sender side for channel lifecycle events.
#[derive(Clone)]
pub struct SubscriptionBus {
    tx: mpsc::Sender<ChannelEvent>,
}

impl SubscriptionBus {
    /// Create the bus and the single receiver the listener consumes.
    pub fn channel(capacity: usize) -> (Self, SubscriptionEvents) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue `event` for the listener, waiting while it is behind.
    pub async fn emit(&self, event: ChannelEvent) {
        tracing::debug!(?event, "SubscriptionBus emit");
        if let Err(e) = self.tx.send(event).await {
            tracing::debug!(event = ?e.0, "No subscription listener running, event dropped");
        }
    }

    /// Whether the listener's receiver is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

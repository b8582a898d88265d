//! Core traits for kindred's delivery pipeline.
//!
//! These traits are the seams between the dispatcher and its collaborators,
//! so PostgreSQL-backed and in-memory implementations are interchangeable.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;
use crate::error::Result;
use crate::notifications::{
    LiveNotification, MarkOutcome, NewNotification, Notification, NotificationStatus,
};

// =============================================================================
// NOTIFICATION STORE
// =============================================================================

/// Durable per-recipient notification records.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Insert an UNREAD row unless `(recipient, event_id)` already exists.
    ///
    /// Returns `true` when a row was created, `false` for a duplicate.
    async fn insert_if_absent(&self, notification: &NewNotification) -> Result<bool>;

    /// Fetch one row.
    async fn find(&self, recipient: &str, event_id: &str) -> Result<Option<Notification>>;

    /// All UNREAD rows for a recipient, newest first.
    async fn list_unread(&self, recipient: &str) -> Result<Vec<Notification>>;

    /// All rows for a recipient, newest first.
    async fn list_for_recipient(&self, recipient: &str) -> Result<Vec<Notification>>;

    /// Set one row's status.
    ///
    /// Fails with `NotFound` when the row is absent.
    async fn set_status(
        &self,
        recipient: &str,
        event_id: &str,
        status: NotificationStatus,
    ) -> Result<MarkOutcome>;

    /// Flip every UNREAD row to READ. Returns the event ids changed.
    async fn mark_all_read(&self, recipient: &str) -> Result<Vec<String>>;

    /// Flip the listed rows to UNREAD. Returns the event ids changed.
    async fn mark_unread_batch(&self, recipient: &str, event_ids: &[String])
        -> Result<Vec<String>>;

    /// Remove one row. Returns `false` when it did not exist.
    async fn delete(&self, recipient: &str, event_id: &str) -> Result<bool>;

    /// Remove every READ row. Returns the number removed.
    async fn delete_all_read(&self, recipient: &str) -> Result<u64>;
}

// =============================================================================
// AUDIENCE
// =============================================================================

/// Resolves which users currently have access to a tree.
#[async_trait]
pub trait AudienceResolver: Send + Sync {
    /// Users with any access relationship to `tree_id`. Never cached.
    async fn users_for_tree(&self, tree_id: &str) -> Result<BTreeSet<String>>;
}

// =============================================================================
// BROKER
// =============================================================================

/// Exchange, queue, and binding the pipeline depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerTopology {
    pub exchange: String,
    pub queue: String,
    pub binding: String,
}

impl Default for BrokerTopology {
    fn default() -> Self {
        Self {
            exchange: defaults::EXCHANGE_NAME.to_string(),
            queue: defaults::QUEUE_NAME.to_string(),
            binding: defaults::BINDING_PATTERN.to_string(),
        }
    }
}

/// A claimed message. Must be acked or nacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_id: Uuid,
    pub queue: String,
    pub routing_key: String,
    pub body: String,
    /// Number of times this message has been claimed, including this one.
    pub attempts: i32,
}

impl Delivery {
    pub fn redelivered(&self) -> bool {
        self.attempts > 1
    }
}

/// Durable topic broker with at-least-once delivery.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Declare the exchange, queue, and binding. Idempotent.
    async fn declare_topology(&self, topology: &BrokerTopology) -> Result<()>;

    /// Route `body` to every queue bound to `exchange` with a matching
    /// pattern. Returns the number of queues the message was enqueued on.
    async fn publish(&self, exchange: &str, routing_key: &str, body: &str) -> Result<usize>;

    /// Claim the oldest visible message on `queue`.
    async fn receive(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Remove a delivered message.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Return a delivered message to the queue for redelivery.
    async fn nack(&self, delivery: &Delivery) -> Result<()>;

    /// Messages on `queue`, ready plus in flight.
    async fn depth(&self, queue: &str) -> Result<i64>;
}

// =============================================================================
// LIVE CHANNEL
// =============================================================================

/// Best-effort push to a user's private notification channel.
///
/// Delivery to a disconnected user is a normal outcome, so there is no
/// return value.
pub trait LiveChannel: Send + Sync {
    fn send(&self, user_id: &str, payload: &LiveNotification);
}

//! In-memory implementations of the pipeline traits.
//!
//! Used by tests across the workspace and for single-process development.
//! [`InMemoryBroker`] follows the same topic and redelivery rules as the
//! PostgreSQL broker: messages are routed by binding pattern, a claimed
//! message is hidden until it is acked, nacked, or its visibility timeout
//! elapses.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};
use crate::notifications::{
    LiveNotification, MarkOutcome, NewNotification, Notification, NotificationStatus,
};
use crate::topic::topic_matches;
use crate::traits::{
    AudienceResolver, BrokerTopology, Delivery, LiveChannel, MessageBroker,
    NotificationRepository,
};

// =============================================================================
// BROKER
// =============================================================================

#[derive(Debug)]
struct QueuedMessage {
    id: Uuid,
    routing_key: String,
    body: String,
    attempts: i32,
    claimed_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct BrokerState {
    /// exchange -> [(pattern, queue)]
    bindings: HashMap<String, Vec<(String, String)>>,
    queues: HashMap<String, Vec<QueuedMessage>>,
}

/// Topic broker held in process memory.
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    visibility_timeout: Duration,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            visibility_timeout: Duration::from_secs(defaults::VISIBILITY_TIMEOUT_SECS),
        }
    }

    /// Override how long a claimed message stays hidden.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Bodies currently on `queue`, oldest first (test helper).
    pub async fn bodies(&self, queue: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|msgs| msgs.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare_topology(&self, topology: &BrokerTopology) -> Result<()> {
        let mut state = self.state.lock().await;
        state.queues.entry(topology.queue.clone()).or_default();
        let bindings = state.bindings.entry(topology.exchange.clone()).or_default();
        let binding = (topology.binding.clone(), topology.queue.clone());
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &str) -> Result<usize> {
        let mut state = self.state.lock().await;
        let targets: Vec<String> = state
            .bindings
            .get(exchange)
            .ok_or_else(|| Error::Transport(format!("exchange not declared: {}", exchange)))?
            .iter()
            .filter(|(pattern, _)| topic_matches(pattern, routing_key))
            .map(|(_, queue)| queue.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        for queue in &targets {
            state
                .queues
                .entry(queue.clone())
                .or_default()
                .push(QueuedMessage {
                    id: crate::uuid_utils::new_v7(),
                    routing_key: routing_key.to_string(),
                    body: body.to_string(),
                    attempts: 0,
                    claimed_at: None,
                });
        }
        if targets.is_empty() {
            tracing::debug!(exchange, routing_key, "Unroutable message dropped");
        }
        Ok(targets.len())
    }

    async fn receive(&self, queue: &str) -> Result<Option<Delivery>> {
        let mut state = self.state.lock().await;
        let timeout = self.visibility_timeout;
        let Some(messages) = state.queues.get_mut(queue) else {
            return Ok(None);
        };
        let now = Instant::now();
        let next = messages.iter_mut().find(|m| match m.claimed_at {
            None => true,
            Some(at) => now.duration_since(at) >= timeout,
        });
        Ok(next.map(|m| {
            m.claimed_at = Some(now);
            m.attempts += 1;
            Delivery {
                delivery_id: m.id,
                queue: queue.to_string(),
                routing_key: m.routing_key.clone(),
                body: m.body.clone(),
                attempts: m.attempts,
            }
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(messages) = state.queues.get_mut(&delivery.queue) {
            messages.retain(|m| m.id != delivery.delivery_id);
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(m) = state
            .queues
            .get_mut(&delivery.queue)
            .and_then(|msgs| msgs.iter_mut().find(|m| m.id == delivery.delivery_id))
        {
            m.claimed_at = None;
        }
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state.queues.get(queue).map(|m| m.len() as i64).unwrap_or(0))
    }
}

// =============================================================================
// NOTIFICATION STORE
// =============================================================================

#[derive(Debug, Default)]
struct StoreState {
    next_id: i64,
    rows: Vec<Notification>,
}

/// Notification store held in process memory.
#[derive(Default)]
pub struct InMemoryNotificationRepository {
    state: Mutex<StoreState>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows across all recipients (test helper).
    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn newest_first(mut rows: Vec<Notification>) -> Vec<Notification> {
    rows.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then(b.internal_id.cmp(&a.internal_id))
    });
    rows
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn insert_if_absent(&self, n: &NewNotification) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state
            .rows
            .iter()
            .any(|r| r.recipient_user_id == n.recipient_user_id && r.event_id == n.event_id)
        {
            return Ok(false);
        }
        state.next_id += 1;
        let now = Utc::now();
        let row = Notification {
            internal_id: state.next_id,
            event_id: n.event_id.clone(),
            recipient_user_id: n.recipient_user_id.clone(),
            event_type: n.event_type.clone(),
            tree_id: n.tree_id.clone(),
            tree_name: n.tree_name.clone(),
            actor_user_id: n.actor_user_id.clone(),
            actor_user_name: n.actor_user_name.clone(),
            message_payload: n.message_payload.clone(),
            status: NotificationStatus::Unread,
            created_at: now,
            updated_at: now,
        };
        state.rows.push(row);
        Ok(true)
    }

    async fn find(&self, recipient: &str, event_id: &str) -> Result<Option<Notification>> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .iter()
            .find(|r| r.recipient_user_id == recipient && r.event_id == event_id)
            .cloned())
    }

    async fn list_unread(&self, recipient: &str) -> Result<Vec<Notification>> {
        let state = self.state.lock().await;
        Ok(newest_first(
            state
                .rows
                .iter()
                .filter(|r| r.recipient_user_id == recipient && r.is_unread())
                .cloned()
                .collect(),
        ))
    }

    async fn list_for_recipient(&self, recipient: &str) -> Result<Vec<Notification>> {
        let state = self.state.lock().await;
        Ok(newest_first(
            state
                .rows
                .iter()
                .filter(|r| r.recipient_user_id == recipient)
                .cloned()
                .collect(),
        ))
    }

    async fn set_status(
        &self,
        recipient: &str,
        event_id: &str,
        status: NotificationStatus,
    ) -> Result<MarkOutcome> {
        let mut state = self.state.lock().await;
        let row = state
            .rows
            .iter_mut()
            .find(|r| r.recipient_user_id == recipient && r.event_id == event_id)
            .ok_or_else(|| {
                Error::NotFound(format!("notification {} for {}", event_id, recipient))
            })?;
        if row.status == status {
            return Ok(MarkOutcome::Unchanged);
        }
        row.status = status;
        row.updated_at = Utc::now();
        Ok(MarkOutcome::Updated)
    }

    async fn mark_all_read(&self, recipient: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut changed = Vec::new();
        for row in state
            .rows
            .iter_mut()
            .filter(|r| r.recipient_user_id == recipient && r.is_unread())
        {
            row.status = NotificationStatus::Read;
            row.updated_at = now;
            changed.push(row.event_id.clone());
        }
        Ok(changed)
    }

    async fn mark_unread_batch(
        &self,
        recipient: &str,
        event_ids: &[String],
    ) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut changed = Vec::new();
        for row in state.rows.iter_mut().filter(|r| {
            r.recipient_user_id == recipient
                && r.status == NotificationStatus::Read
                && event_ids.contains(&r.event_id)
        }) {
            row.status = NotificationStatus::Unread;
            row.updated_at = now;
            changed.push(row.event_id.clone());
        }
        Ok(changed)
    }

    async fn delete(&self, recipient: &str, event_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let before = state.rows.len();
        state
            .rows
            .retain(|r| !(r.recipient_user_id == recipient && r.event_id == event_id));
        Ok(state.rows.len() < before)
    }

    async fn delete_all_read(&self, recipient: &str) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.rows.len();
        state
            .rows
            .retain(|r| !(r.recipient_user_id == recipient && r.status == NotificationStatus::Read));
        Ok((before - state.rows.len()) as u64)
    }
}

// =============================================================================
// AUDIENCE
// =============================================================================

/// Fixed tree → users map.
#[derive(Default)]
pub struct StaticAudience {
    trees: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl StaticAudience {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the members of `tree_id`.
    pub async fn set_members<I, S>(&self, tree_id: &str, users: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trees
            .lock()
            .await
            .insert(tree_id.to_string(), users.into_iter().map(Into::into).collect());
    }
}

#[async_trait]
impl AudienceResolver for StaticAudience {
    async fn users_for_tree(&self, tree_id: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .trees
            .lock()
            .await
            .get(tree_id)
            .cloned()
            .unwrap_or_default())
    }
}

// =============================================================================
// LIVE CHANNEL
// =============================================================================

/// Live channel that records every send (test helper).
#[derive(Default)]
pub struct RecordingChannel {
    sent: StdMutex<Vec<(String, LiveNotification)>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, in send order.
    pub fn sent(&self) -> Vec<(String, LiveNotification)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Payloads sent to one user, in send order.
    pub fn sent_to(&self, user_id: &str) -> Vec<LiveNotification> {
        self.sent()
            .into_iter()
            .filter(|(u, _)| u == user_id)
            .map(|(_, p)| p)
            .collect()
    }
}

impl LiveChannel for RecordingChannel {
    fn send(&self, user_id: &str, payload: &LiveNotification) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((user_id.to_string(), payload.clone()));
    }
}

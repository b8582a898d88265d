//! Fan-out of one tree event to every user with access to its tree.
//!
//! Per event: resolve the audience, then for each recipient persist an
//! UNREAD row (insert-if-absent) and push the live payload. Recipients are
//! handled concurrently and independently: a store error for one recipient
//! is logged and does not affect the others, and a live push never fails.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use kindred_core::{
    normalize_user_id, AudienceResolver, LiveChannel, LiveNotification, NewNotification,
    NotificationRepository, Result, TreeEvent,
};

/// Per-event delivery counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub event_id: String,
    /// Distinct, non-blank users resolved for the tree.
    pub recipients: usize,
    /// Rows newly created.
    pub persisted: usize,
    /// Rows that already existed (redelivery).
    pub duplicates: usize,
    /// Recipients whose row could not be written.
    pub persist_failures: usize,
    /// Live pushes attempted.
    pub pushed: usize,
}

/// Result of handling one broker message. Every variant is acked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Delivered(DispatchReport),
    /// Nobody has access to the tree.
    NoAudience { event_id: String, tree_id: String },
    /// Undecodable or missing `treeId`.
    Malformed { reason: String },
}

enum Persisted {
    Created,
    Duplicate,
    Failed,
}

/// Broker consumer logic: audience → store → live channel.
#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn NotificationRepository>,
    audience: Arc<dyn AudienceResolver>,
    live: Arc<dyn LiveChannel>,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn NotificationRepository>,
        audience: Arc<dyn AudienceResolver>,
        live: Arc<dyn LiveChannel>,
    ) -> Self {
        Self {
            store,
            audience,
            live,
        }
    }

    /// Decode a broker body and dispatch it.
    ///
    /// Decode failures are reported as [`DispatchOutcome::Malformed`] so the
    /// caller acks them; only audience-resolution failures return `Err`.
    pub async fn handle_body(&self, body: &str) -> Result<DispatchOutcome> {
        match TreeEvent::from_json(body) {
            Ok(event) => self.dispatch(&event).await,
            Err(e) => {
                warn!(
                    subsystem = "dispatch",
                    component = "dispatcher",
                    error = %e,
                    "Dropping undecodable message"
                );
                Ok(DispatchOutcome::Malformed {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Deliver `event` to its tree's audience.
    pub async fn dispatch(&self, event: &TreeEvent) -> Result<DispatchOutcome> {
        let start = Instant::now();
        let event_id = event.event_id();

        let tree_id = match event.require_tree_id() {
            Ok(tree_id) => tree_id,
            Err(e) => {
                warn!(
                    subsystem = "dispatch",
                    component = "dispatcher",
                    event_id = %event_id,
                    "Tree event has no treeId, cannot dispatch"
                );
                return Ok(DispatchOutcome::Malformed {
                    reason: e.to_string(),
                });
            }
        };

        let users = self.audience.users_for_tree(tree_id).await?;
        let resolved = users.len();
        let recipients: Vec<String> = users
            .iter()
            .filter_map(|u| normalize_user_id(u))
            .map(String::from)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if recipients.len() < resolved {
            warn!(
                event_id = %event_id,
                tree_id = %tree_id,
                skipped = resolved - recipients.len(),
                "Skipping blank or duplicate recipient ids"
            );
        }

        if recipients.is_empty() {
            warn!(
                subsystem = "dispatch",
                component = "dispatcher",
                event_id = %event_id,
                tree_id = %tree_id,
                "No users have access to tree, nothing to dispatch"
            );
            return Ok(DispatchOutcome::NoAudience {
                event_id: event_id.to_string(),
                tree_id: tree_id.to_string(),
            });
        }

        debug!(
            event_id = %event_id,
            tree_id = %tree_id,
            recipient_count = recipients.len(),
            "Resolved audience"
        );

        let payload = LiveNotification::from_event(event);
        let results = join_all(
            recipients
                .iter()
                .map(|recipient| self.deliver_to(event, recipient, &payload)),
        )
        .await;

        let mut report = DispatchReport {
            event_id: event_id.to_string(),
            recipients: recipients.len(),
            pushed: recipients.len(),
            ..Default::default()
        };
        for result in results {
            match result {
                Persisted::Created => report.persisted += 1,
                Persisted::Duplicate => report.duplicates += 1,
                Persisted::Failed => report.persist_failures += 1,
            }
        }

        info!(
            subsystem = "dispatch",
            component = "dispatcher",
            event_id = %event_id,
            tree_id = %tree_id,
            recipient_count = report.recipients,
            persisted = report.persisted,
            duplicates = report.duplicates,
            persist_failures = report.persist_failures,
            duration_ms = start.elapsed().as_millis() as u64,
            "Dispatched tree event"
        );
        Ok(DispatchOutcome::Delivered(report))
    }

    async fn deliver_to(
        &self,
        event: &TreeEvent,
        recipient: &str,
        payload: &LiveNotification,
    ) -> Persisted {
        let persisted = match NewNotification::for_recipient(event, recipient) {
            Ok(row) => match self.store.insert_if_absent(&row).await {
                Ok(true) => Persisted::Created,
                Ok(false) => {
                    debug!(
                        event_id = %event.event_id(),
                        recipient = %recipient,
                        "Notification already stored"
                    );
                    Persisted::Duplicate
                }
                Err(e) => {
                    error!(
                        event_id = %event.event_id(),
                        recipient = %recipient,
                        error = %e,
                        "Failed to store notification"
                    );
                    Persisted::Failed
                }
            },
            Err(e) => {
                error!(recipient = %recipient, error = %e, "Cannot build notification row");
                Persisted::Failed
            }
        };

        trace!(
            event_id = %event.event_id(),
            recipient = %recipient,
            "Pushing live notification"
        );
        self.live.send(recipient, payload);
        persisted
    }
}

//! Durable notification records and the live payload sent to clients.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{Error, Result};
use crate::events::{EventType, TreeEvent};

/// Destination a client subscribes to for its own notifications.
pub const USER_QUEUE_DESTINATION: &str = "/user/queue/notifications";

/// Canonical form of a user id: surrounding whitespace removed.
///
/// Returns `None` for ids that are blank once trimmed. Every place a user id
/// enters the system (token subject, management caller, resolved audience)
/// goes through here so stored rows and lookups agree.
pub fn normalize_user_id(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Per-user address of the private notification channel.
pub fn user_destination(user_id: &str) -> String {
    format!("/user/{}/queue/notifications", user_id)
}

/// Read state of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Unread,
    Read,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unread => "UNREAD",
            Self::Read => "READ",
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "UNREAD" => Ok(Self::Unread),
            "READ" => Ok(Self::Read),
            other => Err(Error::Serialization(format!(
                "unknown notification status: {}",
                other
            ))),
        }
    }
}

/// Result of a status change that found its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkOutcome {
    /// Status flipped and `updated_at` refreshed.
    Updated,
    /// Row already had the requested status.
    Unchanged,
}

/// One event outstanding for one recipient.
///
/// Unique on `(recipient_user_id, event_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub internal_id: i64,
    pub event_id: String,
    pub recipient_user_id: String,
    pub event_type: String,
    pub tree_id: String,
    pub tree_name: Option<String>,
    pub actor_user_id: Option<String>,
    pub actor_user_name: Option<String>,
    /// JSON text of [`TreeEvent::message_payload`].
    pub message_payload: String,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_unread(&self) -> bool {
        self.status == NotificationStatus::Unread
    }

    /// Rebuild the originating event from the stored columns.
    ///
    /// `data` comes from the payload's `details` object; a payload that does
    /// not parse yields empty data rather than an error.
    pub fn event_details(&self) -> TreeEvent {
        let data = serde_json::from_str::<JsonValue>(&self.message_payload)
            .ok()
            .and_then(|v| match v {
                JsonValue::Object(mut obj) => match obj.remove("details") {
                    Some(JsonValue::Object(details)) => Some(details),
                    _ => None,
                },
                _ => None,
            })
            .unwrap_or_else(Map::new);

        TreeEvent::restore(
            self.event_id.clone(),
            Some(EventType::parse_lossy(&self.event_type)),
            Some(self.tree_id.clone()),
            self.tree_name.clone(),
            self.actor_user_id.clone(),
            self.actor_user_name.clone(),
            self.created_at,
            data,
        )
    }

    /// Live payload for backlog replay.
    pub fn to_live(&self) -> LiveNotification {
        LiveNotification {
            id: self.event_id.clone(),
            message: self.message_payload.clone(),
            timestamp: self.created_at,
            event_details: Some(self.event_details()),
        }
    }
}

/// Insert request for one recipient's copy of an event.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub event_id: String,
    pub recipient_user_id: String,
    pub event_type: String,
    pub tree_id: String,
    pub tree_name: Option<String>,
    pub actor_user_id: Option<String>,
    pub actor_user_name: Option<String>,
    pub message_payload: String,
}

impl NewNotification {
    /// Build the UNREAD row for `recipient`.
    ///
    /// A missing event type is stored as `UNKNOWN`; a missing tree id is a
    /// [`Error::MalformedEvent`].
    pub fn for_recipient(event: &TreeEvent, recipient: &str) -> Result<Self> {
        let tree_id = event.require_tree_id()?;
        Ok(Self {
            event_id: event.event_id().to_string(),
            recipient_user_id: recipient.to_string(),
            event_type: event
                .event_type()
                .unwrap_or(EventType::Unknown)
                .as_str()
                .to_string(),
            tree_id: tree_id.to_string(),
            tree_name: event.tree_name().map(String::from),
            actor_user_id: event.actor_user_id().map(String::from),
            actor_user_name: event.actor_user_name().map(String::from),
            message_payload: event.message_payload().to_string(),
        })
    }
}

/// Frame body pushed on a user's notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveNotification {
    /// Event id, used by clients to de-duplicate.
    pub id: String,
    /// JSON text of the message payload.
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_details: Option<TreeEvent>,
}

impl LiveNotification {
    /// Payload for a freshly dispatched event.
    pub fn from_event(event: &TreeEvent) -> Self {
        Self {
            id: event.event_id().to_string(),
            message: event.message_payload().to_string(),
            timestamp: event.timestamp(),
            event_details: Some(event.clone()),
        }
    }
}

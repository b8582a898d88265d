//! Tree domain events.
//!
//! A [`TreeEvent`] describes one change to a family tree ("tree X was
//! modified by user Y"). It is created once by the code performing the
//! domain write, handed to the publisher, serialized onto the broker as
//! camelCase JSON, and decoded again by the dispatcher.
//!
//! Events are immutable after construction: fields are private, the `with_*`
//! builders consume the value, and the event id is assigned exactly once in
//! [`TreeEvent::new`].
//!
//! ## Wire Format
//!
//! ```text
//! {"eventId":"0192...","eventType":"TREE_CREATED","treeId":"t1","treeName":"Smith",
//!  "actorUserId":"u1","actorUserName":"Ann","timestamp":"2026-10-01T09:00:00Z",
//!  "data":{"personId":"p7"}}
//! ```
//!
//! Decoding is lenient so the dispatcher can reject bad events itself:
//! `treeId`, `eventType`, and `actorUserId` may be absent, and a blank value
//! counts as absent. Unrecognised event kinds decode to [`EventType::Unknown`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value as JsonValue};

use crate::error::{Error, Result};
use crate::topic;

// ============================================================================
// Event type
// ============================================================================

/// Kind of change a tree event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    TreeCreated,
    TreeDeleted,
    TreeStructureModified,
    UserAccessChanged,
    /// Fallback for kinds this build does not know.
    #[serde(other)]
    Unknown,
}

impl EventType {
    /// Wire name, also used as the last routing-key word.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TreeCreated => "TREE_CREATED",
            Self::TreeDeleted => "TREE_DELETED",
            Self::TreeStructureModified => "TREE_STRUCTURE_MODIFIED",
            Self::UserAccessChanged => "USER_ACCESS_CHANGED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parse a wire name, mapping anything unrecognised to `Unknown`.
    pub fn parse_lossy(s: &str) -> Self {
        s.parse().unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "TREE_CREATED" => Ok(Self::TreeCreated),
            "TREE_DELETED" => Ok(Self::TreeDeleted),
            "TREE_STRUCTURE_MODIFIED" => Ok(Self::TreeStructureModified),
            "USER_ACCESS_CHANGED" => Ok(Self::UserAccessChanged),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(Error::InvalidInput(format!("unknown event type: {}", other))),
        }
    }
}

// ============================================================================
// Tree event
// ============================================================================

/// An immutable record of one change to a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeEvent {
    event_id: String,
    #[serde(default, deserialize_with = "blank_event_type_as_none")]
    event_type: Option<EventType>,
    #[serde(default, deserialize_with = "blank_as_none")]
    tree_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tree_name: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    actor_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    actor_user_name: Option<String>,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    data: Map<String, JsonValue>,
}

impl TreeEvent {
    /// Create an event with a fresh id and the current time.
    pub fn new(
        event_type: EventType,
        tree_id: impl Into<String>,
        actor_user_id: impl Into<String>,
    ) -> Self {
        Self {
            event_id: crate::uuid_utils::new_v7().to_string(),
            event_type: Some(event_type),
            tree_id: non_blank(tree_id.into()),
            tree_name: None,
            actor_user_id: non_blank(actor_user_id.into()),
            actor_user_name: None,
            timestamp: Utc::now(),
            data: Map::new(),
        }
    }

    /// Rebuild an event from a stored notification row.
    ///
    /// Used by backlog replay; the id and timestamp are the stored ones.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        event_id: String,
        event_type: Option<EventType>,
        tree_id: Option<String>,
        tree_name: Option<String>,
        actor_user_id: Option<String>,
        actor_user_name: Option<String>,
        timestamp: DateTime<Utc>,
        data: Map<String, JsonValue>,
    ) -> Self {
        Self {
            event_id,
            event_type,
            tree_id,
            tree_name,
            actor_user_id,
            actor_user_name,
            timestamp,
            data,
        }
    }

    /// Attach the tree's display name.
    pub fn with_tree_name(mut self, name: impl Into<String>) -> Self {
        self.tree_name = Some(name.into());
        self
    }

    /// Attach the actor's display name.
    pub fn with_actor_name(mut self, name: impl Into<String>) -> Self {
        self.actor_user_name = Some(name.into());
        self
    }

    /// Attach one free-form payload entry.
    pub fn with_data(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> Option<EventType> {
        self.event_type
    }

    pub fn tree_id(&self) -> Option<&str> {
        self.tree_id.as_deref()
    }

    pub fn tree_name(&self) -> Option<&str> {
        self.tree_name.as_deref()
    }

    pub fn actor_user_id(&self) -> Option<&str> {
        self.actor_user_id.as_deref()
    }

    pub fn actor_user_name(&self) -> Option<&str> {
        self.actor_user_name.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> &Map<String, JsonValue> {
        &self.data
    }

    /// Routing key `tree.<treeId>.<eventType>`.
    ///
    /// Fails with [`Error::MalformedEvent`] when either part is missing.
    pub fn routing_key(&self) -> Result<String> {
        let tree_id = self.require_tree_id()?;
        let event_type = self.event_type.ok_or_else(|| {
            Error::MalformedEvent(format!("event {} has no eventType", self.event_id))
        })?;
        Ok(topic::routing_key(tree_id, event_type))
    }

    /// The tree id, or [`Error::MalformedEvent`] when absent.
    pub fn require_tree_id(&self) -> Result<&str> {
        self.tree_id().ok_or_else(|| {
            Error::MalformedEvent(format!("event {} has no treeId", self.event_id))
        })
    }

    /// Summary stored with each notification and sent as the live `message`.
    ///
    /// `details` is always an object, empty when the event carries no data.
    pub fn message_payload(&self) -> JsonValue {
        json!({
            "eventType": self.event_type.unwrap_or(EventType::Unknown).as_str(),
            "treeId": self.tree_id,
            "treeName": self.tree_name,
            "actorUserId": self.actor_user_id,
            "actorUserName": self.actor_user_name,
            "details": self.data,
        })
    }

    /// Encode for the broker.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a broker body.
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body)
            .map_err(|e| Error::MalformedEvent(format!("undecodable event body: {}", e)))
    }
}

fn non_blank(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn blank_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.and_then(non_blank))
}

fn blank_event_type_as_none<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<EventType>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .and_then(non_blank)
        .map(|s| EventType::parse_lossy(&s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(EventType::TreeCreated.as_str(), "TREE_CREATED");
        assert_eq!(
            serde_json::to_string(&EventType::UserAccessChanged).unwrap(),
            r#""USER_ACCESS_CHANGED""#
        );
        assert_eq!(
            serde_json::from_str::<EventType>(r#""TREE_DELETED""#).unwrap(),
            EventType::TreeDeleted
        );
    }

    #[test]
    fn test_event_type_unknown_fallback() {
        assert_eq!(
            serde_json::from_str::<EventType>(r#""PERSON_RENAMED""#).unwrap(),
            EventType::Unknown
        );
        assert_eq!(EventType::parse_lossy("nope"), EventType::Unknown);
        assert!("nope".parse::<EventType>().is_err());
    }

    #[test]
    fn test_new_assigns_id_and_time() {
        let a = TreeEvent::new(EventType::TreeCreated, "t1", "u1");
        let b = TreeEvent::new(EventType::TreeCreated, "t1", "u1");
        assert!(!a.event_id().is_empty());
        assert_ne!(a.event_id(), b.event_id());
        assert!(a.timestamp() <= Utc::now());
        assert!(a.data().is_empty());
    }

    #[test]
    fn test_builders_keep_event_id() {
        let event = TreeEvent::new(EventType::TreeStructureModified, "t1", "u1");
        let id = event.event_id().to_string();
        let event = event
            .with_tree_name("Smith Family")
            .with_actor_name("Ann")
            .with_data("personId", json!("p7"));
        assert_eq!(event.event_id(), id);
        assert_eq!(event.tree_name(), Some("Smith Family"));
        assert_eq!(event.actor_user_name(), Some("Ann"));
        assert_eq!(event.data()["personId"], "p7");
    }

    #[test]
    fn test_routing_key() {
        let event = TreeEvent::new(EventType::TreeCreated, "t1", "u1");
        assert_eq!(event.routing_key().unwrap(), "tree.t1.TREE_CREATED");
    }

    #[test]
    fn test_routing_key_missing_tree_id() {
        let event = TreeEvent::new(EventType::TreeCreated, "  ", "u1");
        assert!(event.tree_id().is_none());
        assert!(matches!(event.routing_key(), Err(Error::MalformedEvent(_))));
    }

    #[test]
    fn test_routing_key_missing_event_type() {
        let event: TreeEvent =
            serde_json::from_value(json!({"eventId": "e1", "treeId": "t1"})).unwrap();
        assert!(event.event_type().is_none());
        assert!(matches!(event.routing_key(), Err(Error::MalformedEvent(_))));
    }

    #[test]
    fn test_json_is_camel_case() {
        let event = TreeEvent::new(EventType::TreeDeleted, "t1", "u1").with_tree_name("T");
        let json = event.to_json().unwrap();
        assert!(json.contains(r#""eventType":"TREE_DELETED""#));
        assert!(json.contains(r#""treeId":"t1""#));
        assert!(json.contains(r#""treeName":"T""#));
        assert!(json.contains(r#""actorUserId":"u1""#));
        // actor name not set
        assert!(!json.contains("actorUserName"));
    }

    #[test]
    fn test_decode_blank_fields_as_absent() {
        let event = TreeEvent::from_json(
            r#"{"eventId":"e1","eventType":" ","treeId":"","actorUserId":"u1"}"#,
        )
        .unwrap();
        assert!(event.event_type().is_none());
        assert!(event.tree_id().is_none());
        assert_eq!(event.actor_user_id(), Some("u1"));
    }

    #[test]
    fn test_decode_unknown_event_type() {
        let event =
            TreeEvent::from_json(r#"{"eventId":"e1","eventType":"HOUSE_MOVED","treeId":"t1"}"#)
                .unwrap();
        assert_eq!(event.event_type(), Some(EventType::Unknown));
        assert_eq!(event.routing_key().unwrap(), "tree.t1.UNKNOWN");
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        assert!(matches!(
            TreeEvent::from_json("not json"),
            Err(Error::MalformedEvent(_))
        ));
        // eventId is mandatory
        assert!(matches!(
            TreeEvent::from_json(r#"{"treeId":"t1"}"#),
            Err(Error::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_broker_body_survives_decode() {
        let event = TreeEvent::new(EventType::UserAccessChanged, "t1", "u1")
            .with_data("grantedTo", json!("u4"));
        let decoded = TreeEvent::from_json(&event.to_json().unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_message_payload_shape() {
        let event = TreeEvent::new(EventType::TreeCreated, "t1", "u1").with_tree_name("Smith");
        let payload = event.message_payload();
        assert_eq!(payload["eventType"], "TREE_CREATED");
        assert_eq!(payload["treeId"], "t1");
        assert_eq!(payload["treeName"], "Smith");
        assert_eq!(payload["actorUserId"], "u1");
        assert!(payload["actorUserName"].is_null());
        assert_eq!(payload["details"], json!({}));
    }
}

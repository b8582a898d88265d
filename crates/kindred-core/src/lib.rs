//! # kindred-core
//!
//! Core types, traits, and abstractions for kindred's tree event delivery.
//!
//! This crate provides the event model, the notification records, the
//! broker/audience/store interfaces, and the in-process live-channel buses
//! that the other kindred crates depend on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod live;
pub mod logging;
pub mod memory;
pub mod notifications;
pub mod topic;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventType, TreeEvent};
pub use live::{
    ChannelEvent, LiveMessage, NotificationBus, SessionOutbox, SubscriptionBus, SubscriptionEvents,
};
pub use notifications::{
    normalize_user_id, user_destination, LiveNotification, MarkOutcome, NewNotification,
    Notification, NotificationStatus, USER_QUEUE_DESTINATION,
};
pub use topic::{routing_key, topic_matches};
pub use traits::*;
pub use uuid_utils::new_v7;

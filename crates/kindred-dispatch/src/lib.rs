//! # kindred-dispatch
//!
//! Tree event fan-out for kindred.
//!
//! This crate provides:
//! - Publishing tree events to the topic exchange
//! - Per-event dispatch to every user with access to the tree
//! - A queue worker that acks, nacks, and broadcasts progress events
//! - Unread backlog replay when a user subscribes to their channel
//! - Caller-scoped notification management
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kindred_dispatch::{DispatchWorker, NotificationDispatcher, WorkerConfig};
//! use kindred_db::Database;
//! use kindred_core::NotificationBus;
//!
//! let db = Database::connect("postgres://...").await?;
//! let bus = NotificationBus::new(256);
//!
//! let dispatcher = NotificationDispatcher::new(
//!     Arc::new(db.notifications.clone()),
//!     Arc::new(db.audience.clone()),
//!     Arc::new(bus.clone()),
//! );
//! let handle = DispatchWorker::new(Arc::new(db.broker.clone()), dispatcher, WorkerConfig::from_env())
//!     .with_wake(db.broker.publish_notify())
//!     .start();
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod dispatcher;
pub mod management;
pub mod publisher;
pub mod subscription;
pub mod worker;

// Re-export core types
pub use kindred_core::*;

pub use dispatcher::{DispatchOutcome, DispatchReport, NotificationDispatcher};
pub use management::NotificationManager;
pub use publisher::{EventPublisher, PublishOutcome};
pub use subscription::{ListenerHandle, SubscriptionListener};
pub use worker::{DispatchWorker, WorkerConfig, WorkerEvent, WorkerHandle};

//! Publishing tree events to the broker.
//!
//! Publishing is fire-and-forget from the caller's point of view: the domain
//! write has already happened, so a bad event or a broker outage is logged
//! and never surfaces as an error.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, warn};

use kindred_core::{defaults, MessageBroker, TreeEvent};

/// What happened to a published event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// Handed to the broker.
    Published { routing_key: String, queues: usize },
    /// Missing `treeId` or `eventType`; dropped.
    Rejected { reason: String },
    /// Serialization or broker failure; dropped.
    Failed { error: String },
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published { .. })
    }
}

/// Publishes tree events to a topic exchange.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn MessageBroker>,
    exchange: String,
}

impl EventPublisher {
    /// Publisher targeting the default exchange.
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self::with_exchange(broker, defaults::EXCHANGE_NAME)
    }

    pub fn with_exchange(broker: Arc<dyn MessageBroker>, exchange: impl Into<String>) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Validate, route, and hand `event` to the broker.
    pub async fn publish(&self, event: &TreeEvent) -> PublishOutcome {
        let routing_key = match event.routing_key() {
            Ok(key) => key,
            Err(e) => {
                warn!(
                    subsystem = "dispatch",
                    component = "publisher",
                    event_id = %event.event_id(),
                    error = %e,
                    "Rejected tree event"
                );
                return PublishOutcome::Rejected {
                    reason: e.to_string(),
                };
            }
        };

        let body = match event.to_json() {
            Ok(body) => body,
            Err(e) => {
                error!(
                    subsystem = "dispatch",
                    component = "publisher",
                    event_id = %event.event_id(),
                    error = %e,
                    "Failed to serialize tree event"
                );
                return PublishOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        match self
            .broker
            .publish(&self.exchange, &routing_key, &body)
            .await
        {
            Ok(queues) => {
                debug!(
                    subsystem = "dispatch",
                    component = "publisher",
                    event_id = %event.event_id(),
                    routing_key = %routing_key,
                    queues,
                    "Published tree event"
                );
                PublishOutcome::Published { routing_key, queues }
            }
            Err(e) => {
                error!(
                    subsystem = "dispatch",
                    component = "publisher",
                    event_id = %event.event_id(),
                    routing_key = %routing_key,
                    error = %e,
                    "Failed to publish tree event"
                );
                PublishOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

//! Structured logging schema and field name constants for kindred.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query deliveries by event, tree, or recipient
//! across the publisher, dispatcher, and API.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, event dropped or recipient skipped |
//! | INFO  | Lifecycle events (startup, shutdown), dispatch completions |
//! | DEBUG | Decision points, routing, replay counts |
//! | TRACE | Per-recipient pushes, per-row replay |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "db", "broker", "dispatch", "ws"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "publisher", "dispatcher", "worker", "subscription_listener"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "publish", "dispatch", "replay", "mark_read"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Event id of the tree event being handled.
pub const EVENT_ID: &str = "event_id";

/// Event kind (`TREE_CREATED`, ...).
pub const EVENT_TYPE: &str = "event_type";

/// Tree the event concerns.
pub const TREE_ID: &str = "tree_id";

/// User receiving a notification.
pub const RECIPIENT: &str = "recipient";

/// Broker routing key.
pub const ROUTING_KEY: &str = "routing_key";

/// Broker delivery id.
pub const DELIVERY_ID: &str = "delivery_id";

/// Broker queue name.
pub const QUEUE: &str = "queue";

/// WebSocket session id.
pub const SESSION_ID: &str = "session_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of recipients resolved for an event.
pub const RECIPIENT_COUNT: &str = "recipient_count";

/// Number of rows replayed or changed.
pub const RESULT_COUNT: &str = "result_count";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

//! # kindred-db
//!
//! PostgreSQL layer for kindred.
//!
//! This crate provides:
//! - Connection pool management
//! - The per-recipient notification store
//! - Tree audience lookup over `tree_access`
//! - A durable topic broker (exchange, binding, queue tables)
//!
//! ## Example
//!
//! ```rust,ignore
//! use kindred_db::Database;
//! use kindred_core::{BrokerTopology, MessageBroker};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/kindred").await?;
//!     db.migrate().await?;
//!     db.broker.declare_topology(&BrokerTopology::default()).await?;
//!     Ok(())
//! }
//! ```
pub mod audience;
pub mod broker;
pub mod notifications;
pub mod pool;
pub mod test_fixtures;

pub use audience::PgAudienceResolver;
pub use broker::PgBroker;
pub use notifications::PgNotificationRepository;
pub use pool::{create_pool, log_pool_metrics, PoolConfig};

use kindred_core::Result;
#[cfg(feature = "migrations")]
use kindred_core::Error;

/// Bundle of PostgreSQL repositories sharing one pool.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Per-recipient notification store.
    pub notifications: PgNotificationRepository,
    /// Tree audience lookup.
    pub audience: PgAudienceResolver,
    /// Durable topic broker.
    pub broker: PgBroker,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            notifications: PgNotificationRepository::new(pool.clone()),
            audience: PgAudienceResolver::new(pool.clone()),
            broker: PgBroker::new(pool.clone()),
            pool,
        }
    }

    /// Replace the broker (e.g. to change its visibility timeout).
    pub fn with_broker(mut self, broker: PgBroker) -> Self {
        self.broker = broker;
        self
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url, PoolConfig::default()).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

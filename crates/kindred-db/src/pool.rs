//! Connection pool setup.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use kindred_core::{defaults, Error, Result};

/// Sizing for the shared PostgreSQL pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a caller waits for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::DB_MAX_CONNECTIONS,
            min_connections: defaults::DB_MIN_CONNECTIONS,
            acquire_timeout: Duration::from_secs(defaults::DB_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    /// Read `DB_MAX_CONNECTIONS` and `DB_MIN_CONNECTIONS`.
    ///
    /// The ceiling is at least one and the floor never exceeds it.
    pub fn from_env() -> Self {
        let max = env_u32("DB_MAX_CONNECTIONS").unwrap_or(defaults::DB_MAX_CONNECTIONS);
        let min = env_u32("DB_MIN_CONNECTIONS").unwrap_or(defaults::DB_MIN_CONNECTIONS);
        Self::default().with_connections(min, max)
    }

    /// Set the pool floor and ceiling, clamped so `1 <= max` and `min <= max`.
    pub fn with_connections(mut self, min: u32, max: u32) -> Self {
        self.max_connections = max.max(1);
        self.min_connections = min.min(self.max_connections);
        self
    }
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Connect a pool to `database_url`.
pub async fn create_pool(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        max_connections = config.max_connections,
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Connected to PostgreSQL"
    );
    Ok(pool)
}

/// Log pool occupancy; warns when every connection is checked out.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();
    debug!(subsystem = "db", pool_size = size, pool_idle = idle, "Pool metrics");
    if size > 0 && idle == 0 {
        warn!(subsystem = "db", pool_size = size, "No idle database connections");
    }
}

//! Durable topic broker backed by PostgreSQL.
//!
//! Exchanges and bindings live in `broker_exchange` / `broker_binding`;
//! every routed copy of a message is one `broker_message` row. Consumers
//! claim rows with `FOR UPDATE SKIP LOCKED`, so several dispatch workers
//! can share a queue. A claimed row is hidden until `visible_at`; if the
//! consumer neither acks nor nacks before then, the row is claimed again
//! (at-least-once delivery).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::debug;

use kindred_core::{
    defaults, new_v7, topic_matches, BrokerTopology, Delivery, Error, MessageBroker, Result,
};

/// PostgreSQL implementation of MessageBroker.
#[derive(Clone)]
pub struct PgBroker {
    pool: Pool<Postgres>,
    visibility_timeout: Duration,
    /// Woken on publish so idle workers skip their poll sleep.
    notify: Arc<Notify>,
}

impl PgBroker {
    /// Create a broker with the default visibility timeout.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            visibility_timeout: Duration::from_secs(defaults::VISIBILITY_TIMEOUT_SECS),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Override how long a claimed message stays hidden.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Handle woken whenever a message is enqueued in this process.
    pub fn publish_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

#[async_trait]
impl MessageBroker for PgBroker {
    async fn declare_topology(&self, topology: &BrokerTopology) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query("INSERT INTO broker_exchange (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(&topology.exchange)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO broker_binding (exchange, queue, pattern) VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING",
        )
        .bind(&topology.exchange)
        .bind(&topology.queue)
        .bind(&topology.binding)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "broker",
            exchange = %topology.exchange,
            queue = %topology.queue,
            binding = %topology.binding,
            "Declared broker topology"
        );
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let declared: Option<String> =
            sqlx::query_scalar("SELECT name FROM broker_exchange WHERE name = $1")
                .bind(exchange)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::Database)?;
        if declared.is_none() {
            return Err(Error::Transport(format!(
                "exchange not declared: {}",
                exchange
            )));
        }

        let bindings = sqlx::query("SELECT queue, pattern FROM broker_binding WHERE exchange = $1")
            .bind(exchange)
            .fetch_all(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let queues: BTreeSet<String> = bindings
            .into_iter()
            .filter(|row| topic_matches(row.get::<&str, _>("pattern"), routing_key))
            .map(|row| row.get("queue"))
            .collect();

        for queue in &queues {
            sqlx::query(
                "INSERT INTO broker_message (id, queue, routing_key, body) VALUES ($1, $2, $3, $4)",
            )
            .bind(new_v7())
            .bind(queue)
            .bind(routing_key)
            .bind(body)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;

        if queues.is_empty() {
            debug!(exchange, routing_key, "Unroutable message dropped");
        } else {
            self.notify.notify_waiters();
        }
        Ok(queues.len())
    }

    async fn receive(&self, queue: &str) -> Result<Option<Delivery>> {
        let row = sqlx::query(
            "UPDATE broker_message
             SET attempts = attempts + 1, visible_at = now() + make_interval(secs => $2)
             WHERE id = (
                 SELECT id FROM broker_message
                 WHERE queue = $1 AND (visible_at IS NULL OR visible_at <= now())
                 ORDER BY enqueued_at ASC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, queue, routing_key, body, attempts",
        )
        .bind(queue)
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| Delivery {
            delivery_id: row.get("id"),
            queue: row.get("queue"),
            routing_key: row.get("routing_key"),
            body: row.get("body"),
            attempts: row.get("attempts"),
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        sqlx::query("DELETE FROM broker_message WHERE id = $1")
            .bind(delivery.delivery_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        sqlx::query("UPDATE broker_message SET visible_at = NULL WHERE id = $1")
            .bind(delivery.delivery_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM broker_message WHERE queue = $1")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count)
    }
}

//! Notification repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use kindred_core::{
    Error, MarkOutcome, NewNotification, Notification, NotificationRepository,
    NotificationStatus, Result,
};

const COLUMNS: &str = "internal_id, event_id, recipient_user_id, event_type, tree_id, tree_name, \
                       actor_user_id, actor_user_name, message_payload, status, created_at, updated_at";

/// PostgreSQL implementation of NotificationRepository.
///
/// `(recipient_user_id, event_id)` is a unique key in the schema, and inserts
/// use `ON CONFLICT DO NOTHING`, so a redelivered event never produces a
/// second row.
#[derive(Clone)]
pub struct PgNotificationRepository {
    pool: Pool<Postgres>,
}

impl PgNotificationRepository {
    /// Create a new PgNotificationRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> Result<Notification> {
        let status: String = row.get("status");
        Ok(Notification {
            internal_id: row.get("internal_id"),
            event_id: row.get("event_id"),
            recipient_user_id: row.get("recipient_user_id"),
            event_type: row.get("event_type"),
            tree_id: row.get("tree_id"),
            tree_name: row.get("tree_name"),
            actor_user_id: row.get("actor_user_id"),
            actor_user_name: row.get("actor_user_name"),
            message_payload: row.get("message_payload"),
            status: status.parse::<NotificationStatus>()?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn parse_rows(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Notification>> {
        rows.into_iter().map(Self::parse_row).collect()
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn insert_if_absent(&self, n: &NewNotification) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO notification (event_id, recipient_user_id, event_type, tree_id, tree_name,
                                       actor_user_id, actor_user_name, message_payload, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'UNREAD')
             ON CONFLICT (recipient_user_id, event_id) DO NOTHING",
        )
        .bind(&n.event_id)
        .bind(&n.recipient_user_id)
        .bind(&n.event_type)
        .bind(&n.tree_id)
        .bind(&n.tree_name)
        .bind(&n.actor_user_id)
        .bind(&n.actor_user_name)
        .bind(&n.message_payload)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find(&self, recipient: &str, event_id: &str) -> Result<Option<Notification>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM notification WHERE recipient_user_id = $1 AND event_id = $2"
        ))
        .bind(recipient)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_row).transpose()
    }

    async fn list_unread(&self, recipient: &str) -> Result<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM notification
             WHERE recipient_user_id = $1 AND status = 'UNREAD'
             ORDER BY created_at DESC, internal_id DESC"
        ))
        .bind(recipient)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_rows(rows)
    }

    async fn list_for_recipient(&self, recipient: &str) -> Result<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM notification
             WHERE recipient_user_id = $1
             ORDER BY created_at DESC, internal_id DESC"
        ))
        .bind(recipient)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_rows(rows)
    }

    async fn set_status(
        &self,
        recipient: &str,
        event_id: &str,
        status: NotificationStatus,
    ) -> Result<MarkOutcome> {
        let result = sqlx::query(
            "UPDATE notification SET status = $3, updated_at = now()
             WHERE recipient_user_id = $1 AND event_id = $2 AND status <> $3",
        )
        .bind(recipient)
        .bind(event_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() > 0 {
            return Ok(MarkOutcome::Updated);
        }

        // Nothing changed: either already in that state, or absent
        let exists: Option<i64> = sqlx::query_scalar(
            "SELECT internal_id FROM notification WHERE recipient_user_id = $1 AND event_id = $2",
        )
        .bind(recipient)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match exists {
            Some(_) => Ok(MarkOutcome::Unchanged),
            None => Err(Error::NotFound(format!(
                "notification {} for {}",
                event_id, recipient
            ))),
        }
    }

    async fn mark_all_read(&self, recipient: &str) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "UPDATE notification SET status = 'READ', updated_at = now()
             WHERE recipient_user_id = $1 AND status = 'UNREAD'
             RETURNING event_id",
        )
        .bind(recipient)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(ids)
    }

    async fn mark_unread_batch(
        &self,
        recipient: &str,
        event_ids: &[String],
    ) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "UPDATE notification SET status = 'UNREAD', updated_at = now()
             WHERE recipient_user_id = $1 AND status = 'READ' AND event_id = ANY($2)
             RETURNING event_id",
        )
        .bind(recipient)
        .bind(event_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(ids)
    }

    async fn delete(&self, recipient: &str, event_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM notification WHERE recipient_user_id = $1 AND event_id = $2",
        )
        .bind(recipient)
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_all_read(&self, recipient: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM notification WHERE recipient_user_id = $1 AND status = 'READ'",
        )
        .bind(recipient)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }
}

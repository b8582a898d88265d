//! Per-user notification management.
//!
//! Every operation is scoped to the authenticated caller; an absent or blank
//! caller is rejected with [`Error::Unauthorized`] before the store is touched.

use std::sync::Arc;

use tracing::{debug, info};

use kindred_core::{
    normalize_user_id, Error, MarkOutcome, Notification, NotificationRepository,
    NotificationStatus, Result,
};

/// Caller-scoped operations over the notification store.
#[derive(Clone)]
pub struct NotificationManager {
    store: Arc<dyn NotificationRepository>,
}

fn require_caller(caller: Option<&str>) -> Result<&str> {
    caller
        .and_then(normalize_user_id)
        .ok_or_else(|| Error::Unauthorized("no authenticated user".to_string()))
}

impl NotificationManager {
    pub fn new(store: Arc<dyn NotificationRepository>) -> Self {
        Self { store }
    }

    /// All of the caller's notifications, newest first.
    pub async fn list(&self, caller: Option<&str>) -> Result<Vec<Notification>> {
        let user = require_caller(caller)?;
        self.store.list_for_recipient(user).await
    }

    /// Mark one notification READ. Already READ is a successful no-op.
    pub async fn mark_read(&self, caller: Option<&str>, event_id: &str) -> Result<MarkOutcome> {
        self.set_status(caller, event_id, NotificationStatus::Read)
            .await
    }

    /// Mark one notification UNREAD again.
    pub async fn mark_unread(&self, caller: Option<&str>, event_id: &str) -> Result<MarkOutcome> {
        self.set_status(caller, event_id, NotificationStatus::Unread)
            .await
    }

    async fn set_status(
        &self,
        caller: Option<&str>,
        event_id: &str,
        status: NotificationStatus,
    ) -> Result<MarkOutcome> {
        let user = require_caller(caller)?;
        let outcome = self.store.set_status(user, event_id, status).await?;
        debug!(
            subsystem = "dispatch",
            component = "management",
            op = "set_status",
            recipient = %user,
            event_id = %event_id,
            %status,
            ?outcome,
            "Notification status set"
        );
        Ok(outcome)
    }

    /// Remove one notification. Absent rows are [`Error::NotFound`].
    pub async fn delete(&self, caller: Option<&str>, event_id: &str) -> Result<()> {
        let user = require_caller(caller)?;
        if !self.store.delete(user, event_id).await? {
            return Err(Error::NotFound(format!(
                "notification {} for {}",
                event_id, user
            )));
        }
        debug!(recipient = %user, event_id = %event_id, "Notification deleted");
        Ok(())
    }

    /// Mark every UNREAD notification READ; returns the event ids changed.
    pub async fn mark_all_read(&self, caller: Option<&str>) -> Result<Vec<String>> {
        let user = require_caller(caller)?;
        let changed = self.store.mark_all_read(user).await?;
        info!(
            subsystem = "dispatch",
            component = "management",
            op = "mark_all_read",
            recipient = %user,
            result_count = changed.len(),
            "Marked all notifications read"
        );
        Ok(changed)
    }

    /// Mark the listed notifications UNREAD; returns the event ids changed.
    pub async fn mark_unread_batch(
        &self,
        caller: Option<&str>,
        event_ids: &[String],
    ) -> Result<Vec<String>> {
        let user = require_caller(caller)?;
        if event_ids.is_empty() {
            return Err(Error::InvalidInput("eventIds must not be empty".to_string()));
        }
        let changed = self.store.mark_unread_batch(user, event_ids).await?;
        info!(
            subsystem = "dispatch",
            component = "management",
            op = "mark_unread_batch",
            recipient = %user,
            requested = event_ids.len(),
            result_count = changed.len(),
            "Marked notifications unread"
        );
        Ok(changed)
    }

    /// Delete every READ notification; returns how many were removed.
    pub async fn delete_all_read(&self, caller: Option<&str>) -> Result<u64> {
        let user = require_caller(caller)?;
        let removed = self.store.delete_all_read(user).await?;
        info!(
            subsystem = "dispatch",
            component = "management",
            op = "delete_all_read",
            recipient = %user,
            result_count = removed,
            "Deleted read notifications"
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_caller() {
        assert_eq!(require_caller(Some("u1")).unwrap(), "u1");
        assert_eq!(require_caller(Some(" u1 ")).unwrap(), "u1");
        assert!(matches!(require_caller(None), Err(Error::Unauthorized(_))));
        assert!(matches!(
            require_caller(Some("  ")),
            Err(Error::Unauthorized(_))
        ));
    }
}

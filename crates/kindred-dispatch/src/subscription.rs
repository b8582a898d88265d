//! Backlog replay when a user subscribes to their notification channel.
//!
//! The listener consumes [`ChannelEvent`]s from the [`SubscriptionBus`]. On
//! every subscribe to the caller's private queue it loads the UNREAD rows
//! (newest first) and queues each one on the subscribing session's
//! [`SessionOutbox`], waiting for room between rows. Each subscribe is
//! replayed on its own task so a slow session never delays another user.
//! Status is never changed here; clients acknowledge through the management
//! API.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace};

use kindred_core::{
    user_destination, ChannelEvent, Error, LiveChannel, Notification, NotificationRepository,
    Result, SessionOutbox, SubscriptionEvents, USER_QUEUE_DESTINATION,
};

/// Replays unread notifications on subscribe.
#[derive(Clone)]
pub struct SubscriptionListener {
    store: Arc<dyn NotificationRepository>,
    live: Arc<dyn LiveChannel>,
}

/// Handle for stopping a running listener.
pub struct ListenerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ListenerHandle {
    /// Signal the listener to stop.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))
    }
}

impl SubscriptionListener {
    pub fn new(store: Arc<dyn NotificationRepository>, live: Arc<dyn LiveChannel>) -> Self {
        Self { store, live }
    }

    /// Push every UNREAD notification for `user_id` on the user's live
    /// channel, newest first.
    ///
    /// Returns the number of messages sent. Use [`replay_to`](Self::replay_to)
    /// when the subscribing session has its own outbox.
    pub async fn on_subscribe(&self, user_id: &str) -> Result<usize> {
        let backlog = self.backlog(user_id).await?;
        for notification in &backlog {
            self.live.send(user_id, &notification.to_live());
        }
        log_replayed(user_id, backlog.len(), backlog.len());
        Ok(backlog.len())
    }

    /// Queue every UNREAD notification for `user_id` on `outbox`, newest
    /// first, waiting whenever the outbox is full.
    ///
    /// Stops early if the session closes; returns the number queued.
    pub async fn replay_to(&self, user_id: &str, outbox: &SessionOutbox) -> Result<usize> {
        let backlog = self.backlog(user_id).await?;
        let mut queued = 0;
        for notification in &backlog {
            if !outbox.deliver(notification.to_live()).await {
                debug!(
                    recipient = %user_id,
                    queued,
                    remaining = backlog.len() - queued,
                    "Session closed during replay"
                );
                break;
            }
            queued += 1;
        }
        log_replayed(user_id, backlog.len(), queued);
        Ok(queued)
    }

    async fn backlog(&self, user_id: &str) -> Result<Vec<Notification>> {
        let backlog = self.store.list_unread(user_id).await?;
        trace!(recipient = %user_id, result_count = backlog.len(), "Loaded unread backlog");
        Ok(backlog)
    }

    /// React to one channel lifecycle event.
    ///
    /// Returns the number of replayed messages; non-subscribe events and
    /// subscriptions to other destinations replay nothing.
    pub async fn handle(&self, event: &ChannelEvent) -> Result<usize> {
        match event {
            ChannelEvent::Subscribed {
                session_id,
                user_id,
                destination,
                outbox,
            } => {
                if !is_notification_queue(user_id, destination) {
                    debug!(
                        session_id = %session_id,
                        recipient = %user_id,
                        destination = %destination,
                        "Ignoring subscription to unrelated destination"
                    );
                    return Ok(0);
                }
                self.replay_to(user_id, outbox).await
            }
            ChannelEvent::Unsubscribed {
                session_id,
                user_id,
                ..
            }
            | ChannelEvent::Disconnected {
                session_id,
                user_id,
            } => {
                trace!(session_id = %session_id, recipient = %user_id, "Channel closed");
                Ok(0)
            }
        }
    }

    /// Consume `events` on a background task until shut down.
    ///
    /// Dropping the returned handle also stops the listener. In-flight
    /// replays are cancelled on stop.
    pub fn start(self, mut events: SubscriptionEvents) -> ListenerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        tokio::spawn(async move {
            info!("Subscription listener started");
            let mut replays = JoinSet::new();
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Subscription listener received shutdown signal");
                        break;
                    }
                    received = events.recv() => match received {
                        Some(event) => {
                            let listener = self.clone();
                            replays.spawn(async move {
                                if let Err(e) = listener.handle(&event).await {
                                    error!(error = %e, ?event, "Backlog replay failed");
                                }
                            });
                        }
                        None => {
                            debug!("Subscription bus closed");
                            break;
                        }
                    },
                    Some(joined) = replays.join_next(), if !replays.is_empty() => {
                        if let Err(e) = joined {
                            error!(error = %e, "Backlog replay task panicked");
                        }
                    }
                }
            }
            replays.shutdown().await;
            info!("Subscription listener stopped");
        });

        ListenerHandle { shutdown_tx }
    }
}

fn is_notification_queue(user_id: &str, destination: &str) -> bool {
    destination == USER_QUEUE_DESTINATION || destination == user_destination(user_id)
}

fn log_replayed(user_id: &str, unread: usize, sent: usize) {
    if unread == 0 {
        debug!(recipient = %user_id, "No unread backlog to replay");
        return;
    }
    info!(
        subsystem = "dispatch",
        component = "subscription",
        recipient = %user_id,
        result_count = sent,
        unread,
        "Replayed unread backlog"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_core::memory::{InMemoryNotificationRepository, RecordingChannel};
    use kindred_core::{EventType, NewNotification, TreeEvent};
    use uuid::Uuid;

    async fn seeded(count: usize) -> (SubscriptionListener, Arc<RecordingChannel>) {
        let store = Arc::new(InMemoryNotificationRepository::new());
        for i in 0..count {
            let event = TreeEvent::new(EventType::TreeCreated, format!("t{}", i), "u9");
            store
                .insert_if_absent(&NewNotification::for_recipient(&event, "u1").unwrap())
                .await
                .unwrap();
        }
        let live = Arc::new(RecordingChannel::new());
        (SubscriptionListener::new(store, live.clone()), live)
    }

    fn subscribed(destination: &str, outbox: SessionOutbox) -> ChannelEvent {
        ChannelEvent::Subscribed {
            session_id: Uuid::nil(),
            user_id: "u1".to_string(),
            destination: destination.to_string(),
            outbox,
        }
    }

    #[test]
    fn test_is_notification_queue() {
        assert!(is_notification_queue("u1", "/user/queue/notifications"));
        assert!(is_notification_queue("u1", "/user/u1/queue/notifications"));
        assert!(!is_notification_queue("u1", "/user/u2/queue/notifications"));
        assert!(!is_notification_queue("u1", "/topic/trees"));
    }

    #[tokio::test]
    async fn test_subscribe_replays_backlog_to_session() {
        let (listener, live) = seeded(2).await;
        let (outbox, mut rx) = SessionOutbox::channel(8);

        let sent = listener
            .handle(&subscribed(USER_QUEUE_DESTINATION, outbox))
            .await
            .unwrap();
        assert_eq!(sent, 2);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        // Session replay does not touch the shared live channel
        assert!(live.sent().is_empty());
    }

    #[tokio::test]
    async fn test_replay_larger_than_outbox_is_complete() {
        let (listener, _live) = seeded(40).await;
        let (outbox, mut rx) = SessionOutbox::channel(4);

        let replay = tokio::spawn(async move { listener.replay_to("u1", &outbox).await });
        let mut ids = Vec::new();
        while let Some(payload) = rx.recv().await {
            ids.push(payload.id);
        }

        assert_eq!(replay.await.unwrap().unwrap(), 40);
        assert_eq!(ids.len(), 40);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 40);
    }

    #[tokio::test]
    async fn test_replay_stops_when_session_closes() {
        let (listener, _live) = seeded(5).await;
        let (outbox, rx) = SessionOutbox::channel(8);
        drop(rx);
        assert_eq!(listener.replay_to("u1", &outbox).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_other_destination_ignored() {
        let (listener, live) = seeded(2).await;
        let (outbox, mut rx) = SessionOutbox::channel(8);
        let sent = listener
            .handle(&subscribed("/topic/trees", outbox))
            .await
            .unwrap();
        assert_eq!(sent, 0);
        assert!(rx.try_recv().is_err());
        assert!(live.sent().is_empty());
    }

    #[tokio::test]
    async fn test_on_subscribe_uses_live_channel() {
        let (listener, live) = seeded(2).await;
        assert_eq!(listener.on_subscribe("u1").await.unwrap(), 2);
        assert_eq!(live.sent_to("u1").len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_is_noop() {
        let (listener, live) = seeded(2).await;
        let sent = listener
            .handle(&ChannelEvent::Disconnected {
                session_id: Uuid::nil(),
                user_id: "u1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(sent, 0);
        assert!(live.sent().is_empty());
    }
}

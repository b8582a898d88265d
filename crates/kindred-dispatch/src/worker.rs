//! Dispatch worker: consumes the tree event queue and drives the dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use kindred_core::{defaults, Delivery, Error, MessageBroker, Result};

use crate::dispatcher::{DispatchOutcome, NotificationDispatcher};

/// Configuration for the dispatch worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue to consume.
    pub queue: String,
    /// Polling interval in milliseconds when the queue is empty.
    pub poll_interval_ms: u64,
    /// Maximum number of deliveries processed concurrently.
    pub max_concurrent: usize,
    /// Whether to consume at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: defaults::QUEUE_NAME.to_string(),
            poll_interval_ms: defaults::DISPATCH_POLL_INTERVAL_MS,
            max_concurrent: defaults::DISPATCH_MAX_CONCURRENT,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DISPATCH_WORKER_ENABLED` | `true` | Enable/disable consumption |
    /// | `DISPATCH_MAX_CONCURRENT` | `4` | Max concurrent deliveries |
    /// | `DISPATCH_POLL_INTERVAL_MS` | `500` | Polling interval when queue is empty |
    /// | `BROKER_QUEUE` | `tree_event_queue` | Queue to consume |
    pub fn from_env() -> Self {
        let enabled = std::env::var("DISPATCH_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent = std::env::var("DISPATCH_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::DISPATCH_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("DISPATCH_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::DISPATCH_POLL_INTERVAL_MS);

        let queue = std::env::var("BROKER_QUEUE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| defaults::QUEUE_NAME.to_string());

        Self {
            queue,
            poll_interval_ms,
            max_concurrent,
            enabled,
        }
    }

    /// Consume a different queue.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set maximum concurrent deliveries.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Enable or disable consumption.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the dispatch worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A delivery was claimed.
    DeliveryReceived {
        delivery_id: Uuid,
        routing_key: String,
        attempts: i32,
    },
    /// Dispatched and acked.
    DeliveryCompleted {
        delivery_id: Uuid,
        outcome: DispatchOutcome,
    },
    /// Dispatch failed; returned to the queue.
    DeliveryRequeued { delivery_id: Uuid, error: String },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Queue consumer feeding the notification dispatcher.
pub struct DispatchWorker {
    broker: Arc<dyn MessageBroker>,
    dispatcher: NotificationDispatcher,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
    wake: Option<Arc<Notify>>,
}

impl DispatchWorker {
    /// Create a new dispatch worker.
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        dispatcher: NotificationDispatcher,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::WORKER_EVENT_CAPACITY);
        Self {
            broker,
            dispatcher,
            config,
            event_tx,
            wake: None,
        }
    }

    /// Cut the idle sleep short whenever `notify` fires (e.g. on publish).
    pub fn with_wake(mut self, notify: Arc<Notify>) -> Self {
        self.wake = Some(notify);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Claim up to `max_concurrent` deliveries and process them concurrently.
    ///
    /// Returns the number of deliveries claimed; `0` means the queue had
    /// nothing visible.
    pub async fn run_once(&self) -> usize {
        let mut tasks = tokio::task::JoinSet::new();

        for _ in 0..self.config.max_concurrent {
            match self.claim().await {
                Some(delivery) => {
                    let worker = self.clone_refs();
                    tasks.spawn(async move {
                        worker.process(delivery).await;
                    });
                }
                None => break,
            }
        }

        let claimed = tasks.len();
        if claimed > 0 {
            debug!(claimed, "Processing concurrent delivery batch");
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Delivery task panicked");
            }
        }
        claimed
    }

    /// Process batches until the queue has nothing visible.
    pub async fn drain(&self) -> usize {
        let mut total = 0;
        loop {
            let claimed = self.run_once().await;
            if claimed == 0 {
                return total;
            }
            total += claimed;
        }
    }

    /// Run the worker loop. Only sleeps when the queue is empty.
    #[instrument(skip(self, shutdown_rx), fields(queue = %self.config.queue))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Dispatch worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent,
            "Dispatch worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Dispatch worker received shutdown signal");
                break;
            }

            if self.run_once().await > 0 {
                // No sleep, immediately try to claim more
                continue;
            }

            let woken = async {
                match &self.wake {
                    Some(notify) => notify.notified().await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Dispatch worker received shutdown signal");
                    break;
                }
                _ = sleep(poll_interval) => {}
                _ = woken => {
                    debug!("Dispatch worker woken by publish");
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Dispatch worker stopped");
    }

    async fn claim(&self) -> Option<Delivery> {
        match self.broker.receive(&self.config.queue).await {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(error = %e, queue = %self.config.queue, "Failed to claim delivery");
                None
            }
        }
    }

    fn clone_refs(&self) -> DispatchWorkerRef {
        DispatchWorkerRef {
            broker: self.broker.clone(),
            dispatcher: self.dispatcher.clone(),
            event_tx: self.event_tx.clone(),
        }
    }
}

/// Lightweight reference bundle for processing a single delivery in a spawned task.
struct DispatchWorkerRef {
    broker: Arc<dyn MessageBroker>,
    dispatcher: NotificationDispatcher,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl DispatchWorkerRef {
    async fn process(self, delivery: Delivery) {
        let start = Instant::now();
        let delivery_id = delivery.delivery_id;

        debug!(
            delivery_id = %delivery_id,
            routing_key = %delivery.routing_key,
            attempts = delivery.attempts,
            "Processing delivery"
        );
        let _ = self.event_tx.send(WorkerEvent::DeliveryReceived {
            delivery_id,
            routing_key: delivery.routing_key.clone(),
            attempts: delivery.attempts,
        });

        match self.dispatcher.handle_body(&delivery.body).await {
            Ok(outcome) => {
                if let Err(e) = self.broker.ack(&delivery).await {
                    // Unacked: the broker redelivers after the visibility timeout
                    error!(error = %e, delivery_id = %delivery_id, "Failed to ack delivery");
                    return;
                }
                debug!(
                    delivery_id = %delivery_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Delivery acked"
                );
                let _ = self.event_tx.send(WorkerEvent::DeliveryCompleted {
                    delivery_id,
                    outcome,
                });
            }
            Err(e) => {
                warn!(
                    delivery_id = %delivery_id,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Dispatch failed, requeueing delivery"
                );
                if let Err(nack_err) = self.broker.nack(&delivery).await {
                    error!(error = %nack_err, delivery_id = %delivery_id, "Failed to nack delivery");
                }
                let _ = self.event_tx.send(WorkerEvent::DeliveryRequeued {
                    delivery_id,
                    error: e.to_string(),
                });
            }
        }
    }
}

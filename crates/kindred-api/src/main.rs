//! kindred-api server binary.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kindred_api::{router, ApiConfig, AppState, TokenVerifier};
use kindred_core::{defaults, MessageBroker, NotificationBus, NotificationRepository, SubscriptionBus};
use kindred_db::{log_pool_metrics, Database, PgBroker, PoolConfig};
use kindred_dispatch::{
    DispatchOutcome, DispatchWorker, NotificationDispatcher, SubscriptionListener, WorkerConfig,
    WorkerEvent,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "kindred_api=debug,kindred_dispatch=debug,tower_http=debug".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("kindred-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                // no ANSI in files unless asked
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = ApiConfig::from_env()?;

    // Database, migrations, broker topology
    let db = Database::connect_with_config(&config.database_url, PoolConfig::from_env()).await?;
    let pg_broker = PgBroker::new(db.pool.clone()).with_visibility_timeout(config.visibility_timeout);
    let db = db.with_broker(pg_broker);
    db.migrate().await?;
    info!("Database migrations applied");

    db.broker.declare_topology(&config.topology).await?;
    info!(
        exchange = %config.topology.exchange,
        queue = %config.topology.queue,
        binding = %config.topology.binding,
        "Broker topology declared"
    );

    let store: Arc<dyn NotificationRepository> = Arc::new(db.notifications.clone());
    let broker: Arc<dyn MessageBroker> = Arc::new(db.broker.clone());
    let live = NotificationBus::new(config.live_channel_capacity);
    let (subscriptions, subscription_events) =
        SubscriptionBus::channel(defaults::SUBSCRIPTION_BUS_CAPACITY);

    // Dispatch worker
    let dispatcher = NotificationDispatcher::new(
        store.clone(),
        Arc::new(db.audience.clone()),
        Arc::new(live.clone()),
    );
    let worker_config = WorkerConfig::from_env().with_queue(config.topology.queue.clone());
    let worker = DispatchWorker::new(broker.clone(), dispatcher, worker_config)
        .with_wake(db.broker.publish_notify());
    let worker_handle = worker.start();
    tokio::spawn(log_worker_events(worker_handle.events()));

    // Backlog replay on subscribe
    let listener_handle = SubscriptionListener::new(store.clone(), Arc::new(live.clone()))
        .start(subscription_events);

    // Periodic pool metrics
    {
        let pool = db.pool.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                log_pool_metrics(&pool);
            }
        });
    }

    let state = AppState::new(
        store,
        broker,
        config.topology.queue.clone(),
        live,
        subscriptions,
        TokenVerifier::new(&config.jwt_secret),
    );
    let app = router(state);

    // Start server
    let addr: SocketAddr = config.bind_addr().parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, shutting down background tasks");
    if let Err(e) = worker_handle.shutdown().await {
        warn!(error = %e, "Dispatch worker already stopped");
    }
    if let Err(e) = listener_handle.shutdown().await {
        warn!(error = %e, "Subscription listener already stopped");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Log worker lifecycle events.
async fn log_worker_events(mut rx: broadcast::Receiver<WorkerEvent>) {
    loop {
        match rx.recv().await {
            Ok(WorkerEvent::DeliveryCompleted {
                delivery_id,
                outcome,
            }) => match outcome {
                DispatchOutcome::Delivered(report) => debug!(
                    delivery_id = %delivery_id,
                    event_id = %report.event_id,
                    recipient_count = report.recipients,
                    "Delivery completed"
                ),
                other => debug!(delivery_id = %delivery_id, outcome = ?other, "Delivery dropped"),
            },
            Ok(WorkerEvent::DeliveryRequeued { delivery_id, error }) => {
                warn!(delivery_id = %delivery_id, error = %error, "Delivery requeued");
            }
            Ok(WorkerEvent::WorkerStopped) => {
                info!("Dispatch worker stopped");
                break;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!(missed = n, "Worker event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

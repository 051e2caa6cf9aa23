use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lumen_api::background;
use lumen_api::config::{JobsConfig, ServerConfig};
use lumen_api::router::build_app_router;
use lumen_api::state::AppState;
use lumen_events::{BrokerConfig, EventBroker};
use lumen_worker::storage::FsImageStore;
use lumen_worker::transform::DefaultTransformer;
use lumen_worker::workers::{self, BuiltinDeps};
use lumen_worker::{Enqueuer, JobRegistry, JobRunStore, MessageChannel, PgJobRunStore, Scheduler, WorkerHarness};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lumen_api=debug,lumen_worker=debug,lumen_events=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    let jobs_config = JobsConfig::from_env().expect("Invalid job configuration");
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    tracing::info!(
        media_root = %jobs_config.media_root.display(),
        topic_capacity = jobs_config.topic_capacity,
        "Loaded job configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = lumen_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    lumen_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    lumen_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    let shutdown = CancellationToken::new();

    // --- Event broker ---
    // Stopped last so the final job events still reach clients.
    let broker_cancel = CancellationToken::new();
    let (broker, broker_handle) = EventBroker::spawn(BrokerConfig::default(), broker_cancel.clone());
    tracing::info!("Event broker started");

    // --- Worker registry ---
    let images = Arc::new(FsImageStore::new(&jobs_config.media_root));
    let deps = BuiltinDeps {
        store: images.clone(),
        catalog: images,
        transformer: Arc::new(DefaultTransformer),
    };
    let registry = Arc::new(
        workers::register_builtin(JobRegistry::builder(), &deps, jobs_config.builtin_concurrency())
            .build()
            .expect("Invalid worker registry"),
    );
    tracing::info!(workers = ?registry.names(), "Worker registry built");

    // --- Channel, run store, harness ---
    let channel = MessageChannel::new(jobs_config.channel_config());
    let store: Arc<dyn JobRunStore> = Arc::new(PgJobRunStore::new(pool.clone()));
    let enqueuer = Enqueuer::new(channel.clone(), Arc::clone(&store), Arc::clone(&registry));

    // Not a child of `shutdown`: the harness drains the closed channel and
    // is only cancelled if that outlasts SHUTDOWN_TIMEOUT_SECS.
    let harness_cancel = CancellationToken::new();
    let harness = WorkerHarness::new(
        Arc::clone(&registry),
        channel.clone(),
        Arc::clone(&store),
        broker.clone(),
    );
    let mut harness_handle = harness.spawn(harness_cancel.clone());

    // --- Scheduler ---
    let scheduler = Scheduler::new(shutdown.child_token());
    if let Some(expression) = &jobs_config.missing_scan_cron {
        let job = background::missing_scan_job(expression, Arc::clone(&registry), enqueuer.clone())
            .expect("Invalid MISSING_SCAN_CRON expression");
        scheduler.add(job).expect("Failed to add missing-scan schedule");
    }

    // --- App state ---
    let state = AppState {
        pool: Some(pool),
        config: Arc::new(config.clone()),
        broker,
        registry: Arc::clone(&registry),
        channel: channel.clone(),
        store,
        enqueuer,
        stream_options: jobs_config.stream_options(),
        shutdown: shutdown.clone(),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    // Event streams never finish on their own, so the root token must fire
    // before the server waits for open connections.
    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_token.cancel();
        })
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    scheduler.shutdown().await;
    tracing::info!("Scheduler stopped");

    channel.close();
    let drain = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(drain, &mut harness_handle).await.is_ok() {
        tracing::info!("Worker harness drained");
    } else {
        tracing::warn!(
            timeout_secs = config.shutdown_timeout_secs,
            pending = channel.topics().iter().map(|t| channel.pending(t)).sum::<usize>(),
            "Queued jobs did not finish in time, abandoning the rest",
        );
        harness_cancel.cancel();
        for worker in registry.workers() {
            worker.cancel();
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), harness_handle).await;
        tracing::info!("Worker harness stopped");
    }

    broker_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), broker_handle).await;
    tracing::info!("Event broker stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

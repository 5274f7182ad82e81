use std::sync::Arc;

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use predict_queue::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{
        broker::RedisBroker, content_store::ContentStore, queue::JobQueue, results::ResultStore,
        submitter::Submitter,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing predict-queue server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "prediction_jobs_submitted_total",
        "Total prediction jobs enqueued"
    );
    metrics::describe_counter!(
        "prediction_jobs_answered_total",
        "Total prediction jobs answered with a prediction"
    );
    metrics::describe_counter!(
        "prediction_jobs_failed_total",
        "Total prediction jobs that timed out or failed, by reason"
    );
    metrics::describe_histogram!(
        "prediction_wait_seconds",
        "Time a submitter waited for its result"
    );
    metrics::describe_gauge!(
        "prediction_queue_depth",
        "Pending jobs observed at the last health check"
    );

    tracing::info!(upload_dir = %config.upload_dir.display(), "Opening content store");
    let store = Arc::new(
        ContentStore::open(&config.upload_dir)
            .await
            .expect("Failed to open upload directory"),
    );

    tracing::info!("Connecting to Redis");
    let broker = Arc::new(
        RedisBroker::new(&config.redis_url)
            .expect("Invalid Redis URL")
            .with_io_timeout(config.redis_timeout()),
    );
    let queue = JobQueue::new(broker.clone(), config.queue_key());
    let results = ResultStore::new(broker, config.key_namespace.clone(), Some(config.result_ttl()));

    // Reachability is checked here for the log line only; every later
    // operation reports its own failure.
    match queue.health_check().await {
        Ok(()) => tracing::info!("Redis reachable"),
        Err(e) => tracing::warn!(error = %e, "Redis not reachable yet; requests will fail until it is"),
    }

    let submitter = Submitter::new(
        store.clone(),
        queue.clone(),
        results,
        config.submit_settings(),
    );
    let state = AppState::new(submitter, store, queue);

    let app = routes::api_router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(routes::MAX_UPLOAD_BYTES));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!(
        bind_addr = %config.bind_addr,
        queue = %config.queue_key(),
        wait_strategy = %config.wait_strategy,
        max_wait_ms = config.max_wait_ms,
        "Server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

use std::sync::Arc;

use predict_queue::{
    config::AppConfig,
    services::{
        broker::RedisBroker,
        classifier::{Classifier, RemoteClassifier},
        content_store::ContentStore,
        queue::JobQueue,
        results::ResultStore,
        worker::Worker,
    },
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting prediction worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    let model_url = config
        .model_url
        .clone()
        .expect("MODEL_URL must be set for worker processes");

    tracing::info!("Initializing services");
    let store = Arc::new(
        ContentStore::open(&config.upload_dir)
            .await
            .expect("Failed to open upload directory"),
    );
    let broker = Arc::new(
        RedisBroker::new(&config.redis_url)
            .expect("Invalid Redis URL")
            .with_io_timeout(config.redis_timeout()),
    );
    let queue = JobQueue::new(broker.clone(), config.queue_key());
    let results = ResultStore::new(broker, config.key_namespace.clone(), Some(config.result_ttl()));
    let classifier: Arc<dyn Classifier> = Arc::new(RemoteClassifier::new(model_url));

    let cancel = CancellationToken::new();
    let mut handles = Vec::with_capacity(config.worker_concurrency);
    for n in 0..config.worker_concurrency {
        let worker = Worker::new(
            format!("worker-{n}"),
            queue.clone(),
            results.clone(),
            store.clone(),
            classifier.clone(),
            config.worker_settings(),
        );
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { worker.run(cancel).await }));
    }

    tracing::info!(
        concurrency = config.worker_concurrency,
        queue = %config.queue_key(),
        "Worker ready, starting job processing loop"
    );

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown requested, finishing in-flight jobs"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal, stopping"),
    }
    cancel.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }
    tracing::info!("All workers stopped");
}

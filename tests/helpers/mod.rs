//! Shared wiring for pipeline tests: an in-memory broker, a temporary
//! content store, and helpers to run workers against them.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use predict_queue::services::{
    broker::{Broker, MemoryBroker},
    classifier::{BlockingClassifier, Classifier},
    content_store::ContentStore,
    queue::JobQueue,
    results::ResultStore,
    submitter::{SubmitSettings, Submitter, WaitStrategy},
    worker::{Worker, WorkerSettings},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const NAMESPACE: &str = "it";

pub struct Pipeline {
    pub dir: tempfile::TempDir,
    pub broker: Arc<MemoryBroker>,
    pub store: Arc<ContentStore>,
    pub queue: JobQueue,
    pub results: ResultStore,
}

impl Pipeline {
    pub async fn new(result_ttl: Option<Duration>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let broker = Arc::new(MemoryBroker::new());
        let store = Arc::new(ContentStore::open(dir.path()).await.expect("content store"));
        let shared: Arc<dyn Broker> = broker.clone();
        Self {
            queue: JobQueue::new(shared.clone(), format!("{NAMESPACE}:service_queue")),
            results: ResultStore::new(shared, NAMESPACE, result_ttl),
            broker,
            store,
            dir,
        }
    }

    pub fn submitter(&self, strategy: WaitStrategy, max_wait: Duration) -> Submitter {
        Submitter::new(
            self.store.clone(),
            self.queue.clone(),
            self.results.clone(),
            SubmitSettings {
                strategy,
                poll_interval: Duration::from_millis(5),
                max_wait,
            },
        )
    }

    pub fn worker(&self, name: &str, classifier: Arc<dyn Classifier>) -> Worker {
        Worker::new(
            name,
            self.queue.clone(),
            self.results.clone(),
            self.store.clone(),
            classifier,
            WorkerSettings {
                dequeue_timeout: Duration::from_millis(25),
                inference_timeout: Duration::from_secs(5),
                error_backoff: Duration::from_millis(10),
            },
        )
    }

    /// Start `count` worker loops; cancel the returned token to stop them.
    pub fn spawn_workers(
        &self,
        count: usize,
        classifier: Arc<dyn Classifier>,
    ) -> (CancellationToken, Vec<JoinHandle<()>>) {
        let cancel = CancellationToken::new();
        let handles = (0..count)
            .map(|n| {
                let worker = self.worker(&format!("worker-{n}"), classifier.clone());
                let cancel = cancel.clone();
                tokio::spawn(async move { worker.run(cancel).await })
            })
            .collect();
        (cancel, handles)
    }
}

/// A model that labels each file by its stored bytes and reports a fixed
/// confidence, so tests can tell which payload produced which answer.
pub fn echo_classifier(score: f64) -> Arc<dyn Classifier> {
    Arc::new(BlockingClassifier::new(move |path: &Path| {
        std::fs::read(path)
            .map(|bytes| (String::from_utf8_lossy(&bytes).into_owned(), score))
            .map_err(|e| e.to_string())
    }))
}

/// A model that takes `delay` per call before answering.
pub fn slow_classifier(delay: Duration) -> Arc<dyn Classifier> {
    Arc::new(BlockingClassifier::new(move |_: &Path| {
        std::thread::sleep(delay);
        Ok::<_, String>(("slow".to_string(), 0.5))
    }))
}

pub async fn stop(cancel: CancellationToken, handles: Vec<JoinHandle<()>>) {
    cancel.cancel();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop")
            .expect("worker panicked");
    }
}

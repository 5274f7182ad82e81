//! Consumer side of the prediction protocol.
//!
//! A worker alternates between waiting on the queue and processing one job.
//! Every job it pops ends with a published record, either the prediction or
//! an error-tagged failure, so the submitter waiting on that id is always
//! answered.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::job::{salvage_job_id, JobDescriptor, ResultRecord};
use crate::models::prediction::Prediction;
use crate::services::classifier::Classifier;
use crate::services::content_store::ContentStore;
use crate::services::queue::{JobQueue, QueueError};
use crate::services::results::{ResultError, ResultStore};

const MAX_PUBLISH_ATTEMPTS: u32 = 3;
const PUBLISH_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Bound on each blocking pop. Cancellation is observed between pops.
    pub dequeue_timeout: Duration,
    pub inference_timeout: Duration,
    /// Pause after a backing store error before trying again.
    pub error_backoff: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_secs(5),
            inference_timeout: Duration::from_secs(60),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// What happened in one dequeue cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// A job was popped and its result published.
    Processed,
    /// The queue stayed empty for the whole dequeue timeout.
    Idle,
    /// A malformed entry was popped and discarded.
    Discarded,
}

pub struct Worker {
    name: String,
    queue: JobQueue,
    results: ResultStore,
    store: Arc<ContentStore>,
    classifier: Arc<dyn Classifier>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        queue: JobQueue,
        results: ResultStore,
        store: Arc<ContentStore>,
        classifier: Arc<dyn Classifier>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            results,
            store,
            classifier,
            settings,
        }
    }

    /// Process jobs until `cancel` fires. A job already popped is always
    /// finished and published before the loop exits.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(worker = %self.name, queue = %self.queue.key(), "Worker waiting for jobs");

        while !cancel.is_cancelled() {
            match self.run_once().await {
                Ok(Cycle::Processed) => {
                    tracing::debug!(worker = %self.name, "Job processed, checking for next job");
                }
                Ok(Cycle::Idle) => {
                    tracing::trace!(worker = %self.name, "No jobs available");
                }
                Ok(Cycle::Discarded) => {}
                Err(e) => {
                    tracing::error!(worker = %self.name, error = %e, "Queue error, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(self.settings.error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!(worker = %self.name, "Worker stopped");
    }

    /// One WAITING -> PROCESSING -> WAITING cycle.
    pub async fn run_once(&self) -> Result<Cycle, WorkerError> {
        let job = match self
            .queue
            .dequeue_blocking(Some(self.settings.dequeue_timeout))
            .await
        {
            Ok(Some(job)) => job,
            Ok(None) => return Ok(Cycle::Idle),
            Err(QueueError::Malformed { payload, source }) => {
                self.discard(&payload, &source.to_string()).await?;
                return Ok(Cycle::Discarded);
            }
            Err(e) => return Err(e.into()),
        };

        self.process(job).await?;
        Ok(Cycle::Processed)
    }

    async fn process(&self, job: JobDescriptor) -> Result<(), WorkerError> {
        tracing::info!(
            worker = %self.name,
            job_id = %job.id,
            payload_reference = %job.payload_reference,
            queued_ms = (chrono::Utc::now() - job.submitted_at).num_milliseconds(),
            "Processing prediction job"
        );

        let start = Instant::now();
        let record = match self.infer(&job).await {
            Ok(prediction) => {
                tracing::info!(
                    job_id = %job.id,
                    prediction = %prediction.label,
                    score = prediction.score,
                    inference_ms = start.elapsed().as_millis() as u64,
                    "Inference complete"
                );
                ResultRecord::completed(job.id, prediction)
            }
            Err(message) => {
                tracing::warn!(job_id = %job.id, error = %message, "Inference failed, publishing error result");
                ResultRecord::failed(job.id, message)
            }
        };
        metrics::histogram!("prediction_inference_seconds").record(start.elapsed().as_secs_f64());
        metrics::counter!("prediction_jobs_processed_total", "status" => record.status())
            .increment(1);

        self.publish(&record).await
    }

    /// Run the model for `job`; any failure becomes the error text of the
    /// published record.
    async fn infer(&self, job: &JobDescriptor) -> Result<Prediction, String> {
        let path = self
            .store
            .locate(&job.payload_reference)
            .await
            .map_err(|e| e.to_string())?;

        match tokio::time::timeout(self.settings.inference_timeout, self.classifier.classify(&path))
            .await
        {
            Ok(Ok(prediction)) => Ok(prediction),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "inference timed out after {}s",
                self.settings.inference_timeout.as_secs_f64()
            )),
        }
    }

    async fn discard(&self, payload: &str, reason: &str) -> Result<(), WorkerError> {
        match salvage_job_id(payload) {
            Some(job_id) => {
                tracing::warn!(job_id = %job_id, error = %reason, "Malformed job, publishing error result");
                self.publish(&ResultRecord::failed(job_id, format!("malformed job: {reason}")))
                    .await
            }
            None => {
                tracing::error!(error = %reason, payload = %payload, "Dropping malformed job with no usable id");
                Ok(())
            }
        }
    }

    async fn publish(&self, record: &ResultRecord) -> Result<(), WorkerError> {
        let mut attempt = 1;
        loop {
            match self.results.publish(record).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < MAX_PUBLISH_ATTEMPTS => {
                    tracing::warn!(
                        job_id = %record.job_id,
                        attempt,
                        error = %e,
                        "Result publish failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(PUBLISH_RETRY_DELAY).await;
                }
                Err(source) => {
                    return Err(WorkerError::Publish {
                        job_id: record.job_id,
                        source,
                    })
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Failed to publish result for job {job_id}: {source}")]
    Publish {
        job_id: Uuid,
        #[source]
        source: ResultError,
    },
}

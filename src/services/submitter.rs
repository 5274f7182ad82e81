//! Producer side of the prediction protocol.
//!
//! A submitter stores the payload, enqueues a job naming it, and then waits
//! on the job's result slot until a worker answers or the deadline passes.
//! The caller sees a plain request/response call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use uuid::Uuid;

use crate::models::job::{JobDescriptor, JobOutcome, ResultRecord, SchemaError};
use crate::models::prediction::Prediction;
use crate::services::broker::BrokerError;
use crate::services::content_store::{ContentStore, StorageError};
use crate::services::queue::{JobQueue, QueueError};
use crate::services::results::{ResultError, ResultStore};

/// How a submitter waits for its result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WaitStrategy {
    /// Blocking pop on the job's own result key.
    #[default]
    Blocking,
    /// Fixed-interval polling; works with any key-value backend.
    Poll,
}

#[derive(Debug, Clone)]
pub struct SubmitSettings {
    pub strategy: WaitStrategy,
    pub poll_interval: Duration,
    /// Deadline applied when the caller does not supply one.
    pub max_wait: Duration,
}

impl Default for SubmitSettings {
    fn default() -> Self {
        Self {
            strategy: WaitStrategy::Blocking,
            poll_interval: Duration::from_millis(50),
            max_wait: Duration::from_secs(30),
        }
    }
}

pub struct Submitter {
    store: Arc<ContentStore>,
    queue: JobQueue,
    results: ResultStore,
    settings: SubmitSettings,
}

impl Submitter {
    pub fn new(
        store: Arc<ContentStore>,
        queue: JobQueue,
        results: ResultStore,
        settings: SubmitSettings,
    ) -> Self {
        Self {
            store,
            queue,
            results,
            settings,
        }
    }

    pub fn settings(&self) -> &SubmitSettings {
        &self.settings
    }

    /// Store an upload (deduplicated by content) and wait for its
    /// prediction. Returns the content reference alongside the result.
    pub async fn predict_upload(
        &self,
        bytes: &[u8],
        original_name: &str,
        timeout: Option<Duration>,
    ) -> Result<(String, Prediction), SubmitError> {
        let reference = self.store.put(bytes, original_name).await?;
        let prediction = self.submit_and_wait(&reference, timeout).await?;
        Ok((reference, prediction))
    }

    /// Enqueue a job for an already-stored payload and wait for the worker's
    /// answer. `timeout` defaults to the configured maximum wait.
    ///
    /// On timeout the job may still be processed later; its result then sits
    /// unread until the result store's expiry reclaims it.
    pub async fn submit_and_wait(
        &self,
        payload_reference: &str,
        timeout: Option<Duration>,
    ) -> Result<Prediction, SubmitError> {
        let timeout = timeout.unwrap_or(self.settings.max_wait);
        let job = JobDescriptor::new(payload_reference);
        let started = Instant::now();

        // The broker is handed the same deadline, but one that stalls or
        // ignores it must not hold the caller past it.
        let exchange = self.exchange(&job, started, timeout);
        let remaining = timeout.saturating_sub(started.elapsed());
        let outcome = match tokio::time::timeout(remaining, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => Ok(None),
        };
        let waited = started.elapsed();
        metrics::histogram!("prediction_wait_seconds").record(waited.as_secs_f64());

        let result = outcome.and_then(|record| match record {
            Some(record) => into_prediction(record),
            None => Err(SubmitError::Timeout {
                job_id: job.id,
                waited,
            }),
        });

        match &result {
            Ok(prediction) => {
                metrics::counter!("prediction_jobs_answered_total").increment(1);
                tracing::info!(
                    job_id = %job.id,
                    prediction = %prediction.label,
                    score = prediction.score,
                    wait_ms = waited.as_millis() as u64,
                    "Result received"
                );
            }
            Err(e) => {
                let reason: &'static str = e.into();
                metrics::counter!("prediction_jobs_failed_total", "reason" => reason).increment(1);
                tracing::warn!(job_id = %job.id, error = %e, "Job did not complete successfully");
            }
        }
        result
    }

    /// Enqueue `job` and wait for its record with the configured strategy.
    async fn exchange(
        &self,
        job: &JobDescriptor,
        started: Instant,
        timeout: Duration,
    ) -> Result<Option<ResultRecord>, SubmitError> {
        self.queue.enqueue(job).await?;
        metrics::counter!("prediction_jobs_submitted_total").increment(1);
        tracing::info!(
            job_id = %job.id,
            payload_reference = %job.payload_reference,
            strategy = %self.settings.strategy,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Job enqueued, awaiting result"
        );

        match self.settings.strategy {
            WaitStrategy::Blocking => self.wait_blocking(job.id, started, timeout).await,
            WaitStrategy::Poll => self.wait_polling(job.id, started, timeout).await,
        }
    }

    async fn wait_blocking(
        &self,
        job_id: Uuid,
        started: Instant,
        timeout: Duration,
    ) -> Result<Option<ResultRecord>, SubmitError> {
        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Ok(self.results.try_consume(job_id).await?);
        }
        Ok(self.results.consume_blocking(job_id, remaining).await?)
    }

    async fn wait_polling(
        &self,
        job_id: Uuid,
        started: Instant,
        timeout: Duration,
    ) -> Result<Option<ResultRecord>, SubmitError> {
        loop {
            if let Some(record) = self.results.try_consume(job_id).await? {
                return Ok(Some(record));
            }
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::time::sleep(self.settings.poll_interval.min(remaining)).await;
        }
    }
}

fn into_prediction(record: ResultRecord) -> Result<Prediction, SubmitError> {
    match record.outcome {
        JobOutcome::Completed { prediction, score } => Prediction::new(prediction, score)
            .map_err(|e| SubmitError::InferenceFailed {
                job_id: record.job_id,
                message: e.to_string(),
            }),
        JobOutcome::Failed { error } => Err(SubmitError::InferenceFailed {
            job_id: record.job_id,
            message: error,
        }),
    }
}

#[derive(Debug, thiserror::Error, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SubmitError {
    /// The payload could not be stored or resolved. Not retried.
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] StorageError),

    /// The backing store is unreachable; the whole call may be retried.
    #[error("Transient failure: {0}")]
    Transient(#[source] BrokerError),

    #[error("No result for job {job_id} after {waited:?}")]
    Timeout { job_id: Uuid, waited: Duration },

    #[error("Inference failed for job {job_id}: {message}")]
    InferenceFailed { job_id: Uuid, message: String },

    #[error("Unreadable record: {0}")]
    Schema(String),
}

impl SubmitError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitError::Transient(_) | SubmitError::Timeout { .. })
    }
}

impl From<QueueError> for SubmitError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Broker(e) => SubmitError::Transient(e),
            QueueError::Encode(e) => SubmitError::Schema(e.to_string()),
            QueueError::Malformed { source, .. } => SubmitError::Schema(source.to_string()),
        }
    }
}

impl From<ResultError> for SubmitError {
    fn from(e: ResultError) -> Self {
        match e {
            ResultError::Broker(e) => SubmitError::Transient(e),
            other => SubmitError::Schema(other.to_string()),
        }
    }
}

impl From<SchemaError> for SubmitError {
    fn from(e: SchemaError) -> Self {
        SubmitError::Schema(e.to_string())
    }
}

use std::sync::Arc;
use std::time::Duration;

use crate::models::job::{JobDescriptor, SchemaError};
use crate::services::broker::{Broker, BrokerError};

/// Shared FIFO of pending prediction jobs.
///
/// Producers push at the head and workers pop from the tail, so jobs are
/// served in submission order. Each pop is atomic in the broker, which
/// gives competing-consumer delivery across any number of workers.
#[derive(Clone)]
pub struct JobQueue {
    broker: Arc<dyn Broker>,
    key: String,
}

impl JobQueue {
    pub fn new(broker: Arc<dyn Broker>, key: impl Into<String>) -> Self {
        Self {
            broker,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Enqueue a prediction job.
    pub async fn enqueue(&self, job: &JobDescriptor) -> Result<(), QueueError> {
        let payload = job.encode()?;
        self.broker.push(&self.key, payload).await?;
        Ok(())
    }

    /// Wait up to `timeout` for the next job (`None` waits indefinitely).
    /// Returns `Ok(None)` when the wait elapses with the queue empty.
    pub async fn dequeue_blocking(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<JobDescriptor>, QueueError> {
        let Some(payload) = self.broker.pop_blocking(&self.key, timeout).await? else {
            return Ok(None);
        };
        match JobDescriptor::decode(&payload) {
            Ok(job) => Ok(Some(job)),
            Err(source) => Err(QueueError::Malformed { payload, source }),
        }
    }

    /// Check backing store connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        self.broker.ping().await?;
        Ok(())
    }

    /// Get the current queue depth (pending jobs).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        Ok(self.broker.len(&self.key).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Failed to encode job: {0}")]
    Encode(#[from] SchemaError),

    /// A popped entry that is not a valid job. It has already left the
    /// queue; the raw payload is kept so the caller can still react.
    #[error("Malformed job on queue: {source}")]
    Malformed {
        payload: String,
        #[source]
        source: SchemaError,
    },
}

impl QueueError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Broker(e) if e.is_retryable())
    }
}

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::models::job::{ResultRecord, SchemaError};
use crate::services::broker::{Broker, BrokerError};

/// Per-job result slots keyed by job id.
///
/// A slot holds at most one record. Publishing overwrites (so a job that is
/// processed twice still leaves one answer) and consuming is a single atomic
/// pop, so a record is handed to at most one reader. Slots expire after
/// `ttl` so answers nobody waits for anymore do not accumulate.
#[derive(Clone)]
pub struct ResultStore {
    broker: Arc<dyn Broker>,
    namespace: String,
    ttl: Option<Duration>,
}

impl ResultStore {
    pub fn new(broker: Arc<dyn Broker>, namespace: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            broker,
            namespace: namespace.into(),
            ttl,
        }
    }

    pub fn key_for(&self, job_id: Uuid) -> String {
        format!("{}:result:{}", self.namespace, job_id)
    }

    pub async fn publish(&self, record: &ResultRecord) -> Result<(), ResultError> {
        let payload = record.encode()?;
        self.broker
            .replace(&self.key_for(record.job_id), payload, self.ttl)
            .await?;
        Ok(())
    }

    /// Take the record for `job_id` if one is waiting. Read and delete are
    /// one operation.
    pub async fn try_consume(&self, job_id: Uuid) -> Result<Option<ResultRecord>, ResultError> {
        let raw = self.broker.pop(&self.key_for(job_id)).await?;
        raw.map(|raw| decode_for(job_id, &raw)).transpose()
    }

    /// Wait up to `timeout` for the record for `job_id` and take it.
    pub async fn consume_blocking(
        &self,
        job_id: Uuid,
        timeout: Duration,
    ) -> Result<Option<ResultRecord>, ResultError> {
        let raw = self
            .broker
            .pop_blocking(&self.key_for(job_id), Some(timeout))
            .await?;
        raw.map(|raw| decode_for(job_id, &raw)).transpose()
    }
}

fn decode_for(job_id: Uuid, raw: &str) -> Result<ResultRecord, ResultError> {
    let record = ResultRecord::decode(raw)?;
    if record.job_id != job_id {
        return Err(ResultError::Mismatched {
            expected: job_id,
            found: record.job_id,
        });
    }
    Ok(record)
}

#[derive(Debug, thiserror::Error)]
pub enum ResultError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Undecodable result record: {0}")]
    Schema(#[from] SchemaError),

    #[error("Result slot for job {expected} held a record for job {found}")]
    Mismatched { expected: Uuid, found: Uuid },
}

impl ResultError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResultError::Broker(e) if e.is_retryable())
    }
}

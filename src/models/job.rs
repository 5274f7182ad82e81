use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::prediction::Prediction;

/// Version stamped on every queued job and published result.
pub const SCHEMA_VERSION: u32 = 1;

/// A prediction job travelling through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDescriptor {
    pub schema_version: u32,
    pub id: Uuid,
    /// Name of the stored payload in the content store (`<sha256>.<ext>`).
    pub payload_reference: String,
    pub submitted_at: DateTime<Utc>,
}

impl JobDescriptor {
    pub fn new(payload_reference: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            id: Uuid::new_v4(),
            payload_reference: payload_reference.into(),
            submitted_at: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, SchemaError> {
        let job: Self = serde_json::from_str(raw)?;
        check_version(job.schema_version)?;
        Ok(job)
    }
}

/// How a job ended, tagged by `status` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, strum::IntoStaticStr)]
#[serde(tag = "status", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobOutcome {
    Completed { prediction: String, score: f64 },
    Failed { error: String },
}

/// Result published by a worker under the originating job id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub schema_version: u32,
    pub job_id: Uuid,
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

impl ResultRecord {
    pub fn completed(job_id: Uuid, prediction: Prediction) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            job_id,
            outcome: JobOutcome::Completed {
                prediction: prediction.label,
                score: prediction.score,
            },
        }
    }

    pub fn failed(job_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            job_id,
            outcome: JobOutcome::Failed {
                error: error.into(),
            },
        }
    }

    pub fn status(&self) -> &'static str {
        (&self.outcome).into()
    }

    pub fn encode(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, SchemaError> {
        let record: Self = serde_json::from_str(raw)?;
        check_version(record.schema_version)?;
        Ok(record)
    }
}

fn check_version(found: u32) -> Result<(), SchemaError> {
    if found != SCHEMA_VERSION {
        return Err(SchemaError::UnsupportedVersion {
            found,
            expected: SCHEMA_VERSION,
        });
    }
    Ok(())
}

/// Pull the job id out of a queue entry that failed to decode, so the
/// waiting submitter can still be answered.
pub fn salvage_job_id(raw: &str) -> Option<Uuid> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value.get("id")?.as_str()?.parse().ok()
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported schema version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

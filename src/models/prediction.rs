use serde::{Deserialize, Serialize};

/// Label and confidence produced by the model for one payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub score: f64,
}

impl Prediction {
    /// Rejects scores outside `[0, 1]` (including NaN).
    pub fn new(label: impl Into<String>, score: f64) -> Result<Self, InvalidScore> {
        if !(0.0..=1.0).contains(&score) {
            return Err(InvalidScore(score));
        }
        Ok(Self {
            label: label.into(),
            score,
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Confidence score {0} is outside [0, 1]")]
pub struct InvalidScore(pub f64);

/// Response body of `POST /api/v1/predict`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub success: bool,
    pub prediction: Option<String>,
    pub score: Option<f64>,
    pub image_file_name: Option<String>,
}

/// Error body returned by the prediction endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<uuid::Uuid>,
}

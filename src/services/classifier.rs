use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::prediction::{InvalidScore, Prediction};

/// The model collaborator: turns a stored payload into a label and score.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, path: &Path) -> Result<Prediction, InferenceError>;
}

/// Adapter for a synchronous, possibly slow model call. Each invocation
/// runs on the blocking thread pool so the worker's runtime stays free.
pub struct BlockingClassifier<F> {
    predict: Arc<F>,
}

impl<F, E> BlockingClassifier<F>
where
    F: Fn(&Path) -> Result<(String, f64), E> + Send + Sync + 'static,
    E: std::fmt::Display,
{
    pub fn new(predict: F) -> Self {
        Self {
            predict: Arc::new(predict),
        }
    }
}

#[async_trait]
impl<F, E> Classifier for BlockingClassifier<F>
where
    F: Fn(&Path) -> Result<(String, f64), E> + Send + Sync + 'static,
    E: std::fmt::Display,
{
    async fn classify(&self, path: &Path) -> Result<Prediction, InferenceError> {
        let predict = Arc::clone(&self.predict);
        let path: PathBuf = path.to_path_buf();
        let (label, score) = tokio::task::spawn_blocking(move || {
            predict(&path).map_err(|e| InferenceError::Model(e.to_string()))
        })
        .await
        .map_err(|e| InferenceError::Model(format!("model call panicked: {e}")))??;
        Ok(Prediction::new(label, score)?)
    }
}

/// Client for a model served over HTTP.
///
/// Sends `{"image": <base64>}` and expects `{"label": .., "score": ..}`.
pub struct RemoteClassifier {
    http: Client,
    endpoint: String,
}

#[derive(Serialize)]
struct ClassifyRequest {
    image: String,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    label: String,
    score: f64,
}

impl RemoteClassifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Classifier for RemoteClassifier {
    async fn classify(&self, path: &Path) -> Result<Prediction, InferenceError> {
        let bytes = tokio::fs::read(path).await?;
        let request_body = ClassifyRequest {
            image: base64::engine::general_purpose::STANDARD.encode(&bytes),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request_body)
            .send()
            .await?
            .error_for_status()?;

        let body: ClassifyResponse = response.json().await?;
        Ok(Prediction::new(body.label, body.score)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Failed to read payload: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model failed: {0}")]
    Model(String),

    #[error(transparent)]
    Score(#[from] InvalidScore),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blocking_classifier_passes_path() {
        let classifier = BlockingClassifier::new(|path: &Path| {
            Ok::<_, String>((path.file_name().unwrap().to_string_lossy().into_owned(), 0.25))
        });
        let prediction = classifier.classify(Path::new("/tmp/abc.png")).await.unwrap();
        assert_eq!(prediction.label, "abc.png");
        assert_eq!(prediction.score, 0.25);
    }

    #[tokio::test]
    async fn test_blocking_classifier_maps_errors() {
        let classifier = BlockingClassifier::new(|_: &Path| Err::<(String, f64), _>("out of memory"));
        let err = classifier.classify(Path::new("x.png")).await.unwrap_err();
        assert!(matches!(err, InferenceError::Model(ref m) if m == "out of memory"));
    }

    #[tokio::test]
    async fn test_out_of_range_score_is_failure() {
        let classifier = BlockingClassifier::new(|_: &Path| Ok::<_, String>(("cat".to_string(), 3.0)));
        let err = classifier.classify(Path::new("x.png")).await.unwrap_err();
        assert!(matches!(err, InferenceError::Score(_)));
    }

    #[tokio::test]
    async fn test_remote_classifier_missing_file() {
        let classifier = RemoteClassifier::new("http://127.0.0.1:9/predict");
        let err = classifier
            .classify(Path::new("/definitely/not/here.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Io(_)));
    }
}

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::app_state::AppState;
use crate::models::prediction::{ErrorResponse, PredictResponse};
use crate::services::content_store::is_allowed_file;
use crate::services::submitter::SubmitError;

/// POST /api/v1/predict: upload an image and wait for its prediction.
pub async fn predict(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if !is_allowed_file(&filename) {
            return Err(ApiError::BadRequest("File type is not supported.".to_string()));
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;

        // The extension says image; make sure the bytes agree.
        image::guess_format(&data).map_err(|_| ApiError::UnsupportedMedia)?;

        upload = Some((filename, data.to_vec()));
    }

    let (filename, data) =
        upload.ok_or_else(|| ApiError::BadRequest("No file provided.".to_string()))?;

    let (reference, prediction) = state
        .submitter
        .predict_upload(&data, &filename, None)
        .await?;

    Ok(Json(PredictResponse {
        success: true,
        prediction: Some(prediction.label),
        score: Some(prediction.score),
        image_file_name: Some(reference),
    }))
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    UnsupportedMedia,
    Submit(SubmitError),
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        ApiError::Submit(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, job_id) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message, None),
            ApiError::UnsupportedMedia => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "File is not a recognised image.".to_string(),
                None,
            ),
            ApiError::Submit(e) => {
                let status = match &e {
                    SubmitError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    SubmitError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
                    SubmitError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                    SubmitError::InferenceFailed { .. } => StatusCode::BAD_GATEWAY,
                    SubmitError::Schema(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let job_id = match &e {
                    SubmitError::Timeout { job_id, .. }
                    | SubmitError::InferenceFailed { job_id, .. } => Some(*job_id),
                    _ => None,
                };
                (status, e.to_string(), job_id)
            }
        };

        let body = ErrorResponse {
            success: false,
            error,
            job_id,
        };
        (status, Json(body)).into_response()
    }
}

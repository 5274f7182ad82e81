use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub redis: ComponentHealth,
    pub storage: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn ok(start: std::time::Instant) -> Self {
        Self {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        }
    }

    fn error() -> Self {
        Self {
            status: "error".to_string(),
            latency_ms: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// GET /health: backing store and upload directory status.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let redis_start = std::time::Instant::now();
    let redis_check = match state.queue.health_check().await {
        Ok(()) => ComponentHealth::ok(redis_start),
        Err(e) => {
            tracing::warn!(error = %e, "Health check: backing store unreachable");
            ComponentHealth::error()
        }
    };

    if redis_check.is_ok() {
        if let Ok(depth) = state.queue.queue_depth().await {
            metrics::gauge!("prediction_queue_depth").set(depth as f64);
        }
    }

    let storage_start = std::time::Instant::now();
    let storage_check = match tokio::fs::metadata(state.store.root()).await {
        Ok(meta) if meta.is_dir() => ComponentHealth::ok(storage_start),
        _ => ComponentHealth::error(),
    };

    let all_healthy = redis_check.is_ok() && storage_check.is_ok();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            redis: redis_check,
            storage: storage_check,
        },
    };

    (status_code, Json(response))
}

//! HTTP surface: `POST /predict`, `GET /health`, `GET /metrics`.

use crate::error::PredictError;
use crate::metrics::{MetricsSnapshot, ServiceMetrics};
use crate::predictor::Predictor;
use crate::types::{HealthStatus, Prediction};
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Multipart field carrying the image
pub const FILE_FIELD: &str = "file";

/// Shared, read-only request state
#[derive(Clone)]
pub struct AppState {
    pub predictor: Arc<Predictor>,
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    pub fn new(predictor: Predictor, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            predictor: Arc::new(predictor),
            metrics,
        }
    }
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/predict", post(predict_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

async fn predict_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Prediction>, PredictError> {
    let start = Instant::now();
    let result = predict(&state, multipart).await;
    let elapsed = start.elapsed();

    match &result {
        Ok(prediction) => {
            state
                .metrics
                .record_prediction(elapsed, &prediction.label, prediction.confidence);
            debug!(
                label = %prediction.label,
                confidence = prediction.confidence,
                latency_us = elapsed.as_micros(),
                "Prediction served"
            );
        }
        Err(e @ PredictError::Inference(_)) => {
            state.metrics.record_error(elapsed, e.kind());
            error!(error = %e, "Inference failed");
        }
        Err(e) => {
            state.metrics.record_error(elapsed, e.kind());
            warn!(kind = e.kind(), error = %e, "Rejected prediction request");
        }
    }

    result.map(Json)
}

async fn predict(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Prediction, PredictError> {
    let bytes = read_file_field(multipart).await?;

    // decode + forward pass are CPU bound
    let predictor = state.predictor.clone();
    tokio::task::spawn_blocking(move || predictor.predict_bytes(&bytes))
        .await
        .map_err(|e| PredictError::Inference(format!("prediction task failed: {e}")))?
}

/// Pull the bytes of the `file` field out of the form.
async fn read_file_field(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Vec<u8>, PredictError> {
    let mut multipart = multipart.map_err(|e| PredictError::MissingInput(e.body_text()))?;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some(FILE_FIELD) {
            let bytes = field.bytes().await.map_err(multipart_error)?;
            return Ok(bytes.to_vec());
        }
    }

    Err(PredictError::MissingInput(format!(
        "multipart form has no `{FILE_FIELD}` field"
    )))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> PredictError {
    PredictError::InvalidRequest {
        status: e.status(),
        message: e.body_text(),
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        model: state.predictor.model_id().to_string(),
        labels: state.predictor.labels().len(),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

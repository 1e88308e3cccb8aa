//! Per-request error taxonomy and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the prediction path. None of them terminate the
/// process; each becomes a structured error response.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("request has no `file` field: {0}")]
    MissingInput(String),

    #[error("malformed request body: {message}")]
    InvalidRequest { status: StatusCode, message: String },

    #[error("payload is not a decodable image: {0}")]
    Decode(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

impl PredictError {
    /// Stable, machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::MissingInput(_) => "missing_input",
            PredictError::InvalidRequest { .. } => "invalid_request",
            PredictError::Decode(_) => "decode_error",
            PredictError::Inference(_) => "inference_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PredictError::MissingInput(_) => StatusCode::BAD_REQUEST,
            PredictError::InvalidRequest { status, .. } => *status,
            PredictError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PredictError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<image::ImageError> for PredictError {
    fn from(e: image::ImageError) -> Self {
        PredictError::Decode(e.to_string())
    }
}

/// Body of every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub kind: &'static str,
    pub message: String,
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind(),
                message: self.to_string(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}

//! Clothing Classifier Service Library
//!
//! Serves top-1 predictions from a pretrained image-classification model
//! exported to ONNX, over a small HTTP API.

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod predictor;
pub mod types;

pub use config::AppConfig;
pub use error::PredictError;
pub use metrics::ServiceMetrics;
pub use models::{ArtifactLoadError, ModelLoader};
pub use predictor::Predictor;
pub use types::Prediction;

//! Type definitions for the classification service

pub mod prediction;

pub use prediction::{HealthStatus, Prediction};

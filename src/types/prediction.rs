//! Response payloads

use serde::{Deserialize, Serialize};

/// Top-1 classification result returned by `POST /predict`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Human-readable class label
    pub label: String,

    /// Softmax probability of `label`, in [0, 1], rounded to 3 decimals
    pub confidence: f64,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub model: String,
    pub labels: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_wire_format() {
        let prediction = Prediction {
            label: "t-shirt".to_string(),
            confidence: 0.987,
        };

        let json = serde_json::to_value(&prediction).unwrap();
        assert_eq!(json, serde_json::json!({"label": "t-shirt", "confidence": 0.987}));
    }
}

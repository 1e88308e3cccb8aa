//! ONNX Runtime backed classification function

use super::{Classify, ImageTensor, LabelVocabulary};
use crate::error::PredictError;
use ort::session::Session;
use ort::value::Tensor;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Preferred input name of Hugging Face image-classification exports.
pub const PIXEL_VALUES_INPUT: &str = "pixel_values";
/// Preferred output name of Hugging Face image-classification exports.
pub const LOGITS_OUTPUT: &str = "logits";

/// Image classifier running an ONNX session.
///
/// `Session::run` needs exclusive access to the session's run state, so the
/// session sits behind a mutex. The weights themselves are never written.
pub struct OnnxClassifier {
    /// Model name (artifact id)
    name: String,
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    labels: LabelVocabulary,
}

impl OnnxClassifier {
    /// Wrap a built session. Returns `None` if the graph has no inputs or
    /// no outputs.
    pub fn new(name: &str, session: Session, labels: LabelVocabulary) -> Option<Self> {
        let input_name = session
            .inputs
            .iter()
            .find(|i| i.name == PIXEL_VALUES_INPUT)
            .or_else(|| session.inputs.first())
            .map(|i| i.name.clone())?;

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name == LOGITS_OUTPUT)
            .or_else(|| session.outputs.first())
            .map(|o| o.name.clone())?;

        Some(Self {
            name: name.to_string(),
            session: Mutex::new(session),
            input_name,
            output_name,
            labels,
        })
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }
}

impl Classify for OnnxClassifier {
    fn classify(&self, input: &ImageTensor) -> Result<Vec<f32>, PredictError> {
        let shape: Vec<i64> = input.shape.iter().map(|&d| d as i64).collect();
        let input_tensor = Tensor::from_array((shape, input.data.clone()))
            .map_err(|e| PredictError::Inference(format!("failed to create input tensor: {e}")))?;

        let mut session = lock_session(&self.session);

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(|e| PredictError::Inference(e.to_string()))?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            PredictError::Inference(format!("model produced no `{}` output", self.output_name))
        })?;

        let (out_shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| PredictError::Inference(format!("unexpected output type: {e}")))?;

        let dims: Vec<i64> = out_shape.iter().copied().collect();
        if data.len() != self.labels.len() {
            return Err(PredictError::Inference(format!(
                "output shape {:?} does not match {} labels",
                dims,
                self.labels.len()
            )));
        }

        debug!(model = %self.name, output_shape = ?dims, "Forward pass complete");

        Ok(data.to_vec())
    }

    fn labels(&self) -> &LabelVocabulary {
        &self.labels
    }
}

/// The session keeps no state between runs; a poisoned lock is still usable.
fn lock_session<T>(session: &Mutex<T>) -> MutexGuard<'_, T> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

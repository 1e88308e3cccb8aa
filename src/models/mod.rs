//! Model components: artifact loading, preprocessing, ONNX inference and
//! score post-processing.

pub mod inference;
pub mod labels;
pub mod loader;
pub mod preprocess;
pub mod scoring;

pub use inference::OnnxClassifier;
pub use labels::LabelVocabulary;
pub use loader::{ArtifactLoadError, LoadedArtifact, ModelLoader};
pub use preprocess::ImagePreprocessor;

use crate::error::PredictError;
use image::RgbImage;

/// Dense `f32` tensor in NCHW layout, batch size 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    /// `[batch, channels, height, width]`
    pub shape: [usize; 4],
    /// Row-major values, `shape.iter().product()` long
    pub data: Vec<f32>,
}

impl ImageTensor {
    pub fn height(&self) -> usize {
        self.shape[2]
    }

    pub fn width(&self) -> usize {
        self.shape[3]
    }
}

/// Maps a decoded RGB image to the fixed-shape tensor the classifier expects.
pub trait Preprocess: Send + Sync {
    fn preprocess(&self, image: &RgbImage) -> ImageTensor;
}

/// Maps a model-ready tensor to one raw score (logit) per class.
pub trait Classify: Send + Sync {
    /// Run a forward pass. Must not mutate model parameters.
    fn classify(&self, input: &ImageTensor) -> Result<Vec<f32>, PredictError>;

    /// Vocabulary indexed by the positions of the returned scores.
    fn labels(&self) -> &LabelVocabulary;
}

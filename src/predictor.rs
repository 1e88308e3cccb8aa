//! Prediction pipeline: decode -> preprocess -> classify -> softmax -> top-1.

use crate::error::PredictError;
use crate::models::scoring::{argmax, round_confidence, softmax};
use crate::models::{Classify, LabelVocabulary, LoadedArtifact, Preprocess};
use crate::types::Prediction;
use image::RgbImage;
use std::sync::Arc;
use tracing::debug;

/// Immutable handle over the loaded model, shared by all requests.
#[derive(Clone)]
pub struct Predictor {
    model_id: String,
    preprocessor: Arc<dyn Preprocess>,
    classifier: Arc<dyn Classify>,
}

impl Predictor {
    pub fn new(
        model_id: impl Into<String>,
        preprocessor: Arc<dyn Preprocess>,
        classifier: Arc<dyn Classify>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            preprocessor,
            classifier,
        }
    }

    pub fn from_artifact(artifact: LoadedArtifact) -> Self {
        Self::new(
            artifact.model_id,
            Arc::new(artifact.preprocessor),
            Arc::new(artifact.classifier),
        )
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn labels(&self) -> &LabelVocabulary {
        self.classifier.labels()
    }

    /// Decode image bytes into 8-bit RGB. Alpha is dropped, grayscale and
    /// palette images are expanded to three channels.
    pub fn decode(bytes: &[u8]) -> Result<RgbImage, PredictError> {
        if bytes.is_empty() {
            return Err(PredictError::Decode("empty payload".to_string()));
        }
        let image = image::load_from_memory(bytes)?;
        Ok(image.to_rgb8())
    }

    /// Full softmax distribution over the label vocabulary.
    pub fn probabilities(&self, image: &RgbImage) -> Result<Vec<f32>, PredictError> {
        let input = self.preprocessor.preprocess(image);
        let logits = self.classifier.classify(&input)?;

        let expected = self.classifier.labels().len();
        if logits.len() != expected {
            return Err(PredictError::Inference(format!(
                "classifier returned {} scores for {} labels",
                logits.len(),
                expected
            )));
        }
        if let Some(bad) = logits.iter().position(|s| !s.is_finite()) {
            return Err(PredictError::Inference(format!(
                "non-finite score at class {bad}"
            )));
        }

        Ok(softmax(&logits))
    }

    pub fn predict_image(&self, image: &RgbImage) -> Result<Prediction, PredictError> {
        let probs = self.probabilities(image)?;
        let best = argmax(&probs)
            .ok_or_else(|| PredictError::Inference("empty score vector".to_string()))?;
        let label = self
            .classifier
            .labels()
            .get(best)
            .ok_or_else(|| PredictError::Inference(format!("no label for class {best}")))?;

        debug!(
            model = %self.model_id,
            class = best,
            label = %label,
            probability = probs[best],
            "Top-1 prediction"
        );

        Ok(Prediction {
            label: label.to_string(),
            confidence: round_confidence(probs[best]),
        })
    }

    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction, PredictError> {
        let image = Self::decode(bytes)?;
        self.predict_image(&image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImagePreprocessor, ImageTensor};
    use image::{DynamicImage, ImageFormat, Rgb};
    use std::io::Cursor;

    /// Scores each class by its channel mean so different colours yield
    /// different predictions.
    struct ChannelMeanClassifier {
        labels: LabelVocabulary,
    }

    impl ChannelMeanClassifier {
        fn new() -> Self {
            Self {
                labels: LabelVocabulary::new(vec![
                    "red".to_string(),
                    "green".to_string(),
                    "blue".to_string(),
                ])
                .unwrap(),
            }
        }
    }

    impl Classify for ChannelMeanClassifier {
        fn classify(&self, input: &ImageTensor) -> Result<Vec<f32>, PredictError> {
            let plane = input.height() * input.width();
            Ok((0..3)
                .map(|c| input.data[c * plane..(c + 1) * plane].iter().sum::<f32>() / plane as f32)
                .collect())
        }

        fn labels(&self) -> &LabelVocabulary {
            &self.labels
        }
    }

    struct ConstClassifier {
        labels: LabelVocabulary,
        scores: Vec<f32>,
    }

    impl Classify for ConstClassifier {
        fn classify(&self, _input: &ImageTensor) -> Result<Vec<f32>, PredictError> {
            Ok(self.scores.clone())
        }

        fn labels(&self) -> &LabelVocabulary {
            &self.labels
        }
    }

    fn predictor_with(classifier: impl Classify + 'static) -> Predictor {
        Predictor::new(
            "test-model",
            Arc::new(ImagePreprocessor::default()),
            Arc::new(classifier),
        )
    }

    fn encode(image: DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn solid_png(color: [u8; 3]) -> Vec<u8> {
        encode(DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb(color))))
    }

    #[test]
    fn test_predicts_dominant_channel() {
        let predictor = predictor_with(ChannelMeanClassifier::new());

        assert_eq!(predictor.predict_bytes(&solid_png([250, 10, 10])).unwrap().label, "red");
        assert_eq!(predictor.predict_bytes(&solid_png([10, 10, 250])).unwrap().label, "blue");
    }

    #[test]
    fn test_prediction_is_deterministic() {
        let predictor = predictor_with(ChannelMeanClassifier::new());
        let bytes = solid_png([30, 200, 90]);

        let first = predictor.predict_bytes(&bytes).unwrap();
        for _ in 0..5 {
            assert_eq!(predictor.predict_bytes(&bytes).unwrap(), first);
        }
    }

    #[test]
    fn test_confidence_is_max_probability() {
        let predictor = predictor_with(ChannelMeanClassifier::new());
        let image = Predictor::decode(&solid_png([120, 40, 200])).unwrap();

        let probs = predictor.probabilities(&image).unwrap();
        let max = probs.iter().copied().fold(f32::MIN, f32::max);
        let prediction = predictor.predict_image(&image).unwrap();

        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((0.0..=1.0).contains(&prediction.confidence));
        assert_eq!(prediction.confidence, round_confidence(max));
    }

    #[test]
    fn test_ties_resolve_to_first_label() {
        let predictor = predictor_with(ConstClassifier {
            labels: LabelVocabulary::new(vec!["a".into(), "b".into(), "c".into()]).unwrap(),
            scores: vec![1.0, 3.0, 3.0],
        });

        let prediction = predictor.predict_bytes(&solid_png([0, 0, 0])).unwrap();
        assert_eq!(prediction.label, "b");
        assert_eq!(prediction.confidence, 0.468);
    }

    #[test]
    fn test_channel_conversion_does_not_change_prediction() {
        let predictor = predictor_with(ChannelMeanClassifier::new());

        let gray = image::GrayImage::from_pixel(40, 24, image::Luma([77]));
        let rgba = image::RgbaImage::from_pixel(40, 24, image::Rgba([77, 77, 77, 255]));
        let rgb = RgbImage::from_pixel(40, 24, Rgb([77, 77, 77]));

        let from_gray = Predictor::decode(&encode(DynamicImage::ImageLuma8(gray))).unwrap();
        let from_rgba = Predictor::decode(&encode(DynamicImage::ImageRgba8(rgba))).unwrap();
        let from_rgb = Predictor::decode(&encode(DynamicImage::ImageRgb8(rgb))).unwrap();

        let reference = predictor.probabilities(&from_rgb).unwrap();
        for probs in [
            predictor.probabilities(&from_gray).unwrap(),
            predictor.probabilities(&from_rgba).unwrap(),
        ] {
            for (a, b) in probs.iter().zip(&reference) {
                assert!((a - b).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_alpha_is_discarded() {
        let translucent = image::RgbaImage::from_pixel(8, 8, image::Rgba([200, 10, 10, 0]));
        let decoded = Predictor::decode(&encode(DynamicImage::ImageRgba8(translucent))).unwrap();

        assert_eq!(decoded.get_pixel(3, 3), &Rgb([200, 10, 10]));
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(Predictor::decode(&[]), Err(PredictError::Decode(_))));
        assert!(matches!(
            Predictor::decode(b"just some text, definitely not a png"),
            Err(PredictError::Decode(_))
        ));
    }

    #[test]
    fn test_score_count_mismatch_is_inference_error() {
        let predictor = predictor_with(ConstClassifier {
            labels: LabelVocabulary::new(vec!["a".into(), "b".into()]).unwrap(),
            scores: vec![0.5],
        });

        let err = predictor.predict_bytes(&solid_png([1, 2, 3])).unwrap_err();
        assert_eq!(err.kind(), "inference_error");
    }

    #[test]
    fn test_non_finite_scores_are_inference_error() {
        let predictor = predictor_with(ConstClassifier {
            labels: LabelVocabulary::new(vec!["a".into(), "b".into()]).unwrap(),
            scores: vec![f32::NAN, 1.0],
        });

        assert!(matches!(
            predictor.predict_bytes(&solid_png([1, 2, 3])),
            Err(PredictError::Inference(_))
        ));
    }
}

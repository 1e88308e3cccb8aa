//! Model artifact loader
//!
//! Resolves a named artifact either from a local directory or from the
//! Hugging Face Hub (files are cached on disk by `hf-hub`), then builds the
//! preprocessing function, the label vocabulary and the ONNX session.

use super::inference::OnnxClassifier;
use super::labels::LabelVocabulary;
use super::preprocess::ImagePreprocessor;
use super::{Classify, Preprocess};
use crate::config::ModelConfig;
use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use hf_hub::{Cache, CacheRepo, Repo, RepoType};
use image::RgbImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const MODEL_CONFIG_FILE: &str = "config.json";
pub const PREPROCESSOR_CONFIG_FILE: &str = "preprocessor_config.json";
pub const FALLBACK_ONNX_FILE: &str = "model.onnx";

/// Side length of the blank image pushed through the model at startup.
const WARM_UP_SIDE: u32 = 224;

/// Startup-fatal artifact errors. The service never binds its listener
/// after one of these.
#[derive(Debug, Error)]
pub enum ArtifactLoadError {
    #[error("model hub client error: {0}")]
    Hub(String),

    #[error("failed to resolve `{file}` from {model_id}: {message}")]
    Resolve {
        model_id: String,
        file: String,
        message: String,
    },

    #[error("artifact {model_id} has no `{file}`")]
    MissingFile { model_id: String, file: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid model config: {0}")]
    ModelConfig(String),

    #[error("invalid preprocessor config: {0}")]
    Preprocessor(String),

    #[error("failed to build ONNX session: {0}")]
    Session(String),

    #[error("model output does not match its label vocabulary: {0}")]
    Schema(String),
}

/// Everything the prediction path needs, loaded once.
pub struct LoadedArtifact {
    pub model_id: String,
    pub preprocessor: ImagePreprocessor,
    pub classifier: OnnxClassifier,
}

/// Where artifact files come from.
enum ArtifactSource {
    Local(PathBuf),
    Hub {
        repo: ApiRepo,
        files: HashSet<String>,
    },
    /// Previously downloaded snapshot, used when the Hub is unreachable.
    Cached(CacheRepo),
}

impl ArtifactSource {
    fn contains(&self, file: &str) -> bool {
        match self {
            ArtifactSource::Local(dir) => dir.join(file).is_file(),
            ArtifactSource::Hub { files, .. } => files.contains(file),
            ArtifactSource::Cached(repo) => repo.get(file).is_some(),
        }
    }

    /// Local path of `file`, downloading it into the cache if needed.
    fn fetch(&self, model_id: &str, file: &str) -> Result<PathBuf, ArtifactLoadError> {
        if !self.contains(file) {
            return Err(ArtifactLoadError::MissingFile {
                model_id: model_id.to_string(),
                file: file.to_string(),
            });
        }
        match self {
            ArtifactSource::Local(dir) => Ok(dir.join(file)),
            ArtifactSource::Hub { repo, .. } => {
                info!(model = %model_id, file = %file, "Fetching artifact file");
                repo.get(file).map_err(|e| ArtifactLoadError::Resolve {
                    model_id: model_id.to_string(),
                    file: file.to_string(),
                    message: e.to_string(),
                })
            }
            ArtifactSource::Cached(repo) => {
                repo.get(file).ok_or_else(|| ArtifactLoadError::MissingFile {
                    model_id: model_id.to_string(),
                    file: file.to_string(),
                })
            }
        }
    }
}

/// Loader for the classification artifact
pub struct ModelLoader {
    revision: String,
    cache_dir: Option<PathBuf>,
    onnx_file: String,
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            revision: config.revision.clone(),
            cache_dir: config.cache_dir.clone(),
            onnx_file: config.onnx_file.clone(),
            onnx_threads: config.onnx_threads.max(1),
        }
    }

    /// Load the artifact named `model_id`: a local directory path or a Hub
    /// repository id.
    pub fn load(&self, model_id: &str) -> Result<LoadedArtifact, ArtifactLoadError> {
        info!(model = %model_id, revision = %self.revision, "Loading model artifact");

        let source = self.resolve(model_id)?;

        let labels = self.load_labels(&source, model_id)?;
        let preprocessor = self.load_preprocessor(&source, model_id)?;
        let onnx_path = self.locate_onnx(&source, model_id)?;
        let session = self.build_session(&onnx_path)?;

        let classifier = OnnxClassifier::new(model_id, session, labels).ok_or_else(|| {
            ArtifactLoadError::Session("graph has no inputs or outputs".to_string())
        })?;

        info!(
            model = %model_id,
            input = %classifier.input_name(),
            output = %classifier.output_name(),
            labels = classifier.labels().len(),
            "Model loaded successfully"
        );

        warm_up(&preprocessor, &classifier)?;

        Ok(LoadedArtifact {
            model_id: model_id.to_string(),
            preprocessor,
            classifier,
        })
    }

    fn resolve(&self, model_id: &str) -> Result<ArtifactSource, ArtifactLoadError> {
        let local = Path::new(model_id);
        if local.is_dir() {
            info!(path = %local.display(), "Using local artifact directory");
            return Ok(ArtifactSource::Local(local.to_path_buf()));
        }

        let mut builder = ApiBuilder::new().with_progress(false);
        if let Some(dir) = &self.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        }
        let api = builder
            .build()
            .map_err(|e| ArtifactLoadError::Hub(e.to_string()))?;

        let repo = api.repo(self.hub_repo(model_id));
        match repo.info() {
            Ok(info) => {
                let files = info.siblings.into_iter().map(|s| s.rfilename).collect();
                Ok(ArtifactSource::Hub { repo, files })
            }
            Err(e) => {
                warn!(model = %model_id, error = %e, "Hub listing failed, trying local cache");
                self.cached_source(model_id)
                    .ok_or_else(|| ArtifactLoadError::Resolve {
                        model_id: model_id.to_string(),
                        file: "<repository listing>".to_string(),
                        message: e.to_string(),
                    })
            }
        }
    }

    fn hub_repo(&self, model_id: &str) -> Repo {
        Repo::with_revision(model_id.to_string(), RepoType::Model, self.revision.clone())
    }

    /// Cached snapshot of `model_id`, if one holds at least `config.json`.
    fn cached_source(&self, model_id: &str) -> Option<ArtifactSource> {
        let cache = match &self.cache_dir {
            Some(dir) => Cache::new(dir.clone()),
            None => Cache::default(),
        };
        let repo = cache.repo(self.hub_repo(model_id));
        repo.get(MODEL_CONFIG_FILE)?;
        info!(model = %model_id, revision = %self.revision, "Using cached artifact snapshot");
        Some(ArtifactSource::Cached(repo))
    }

    fn load_labels(
        &self,
        source: &ArtifactSource,
        model_id: &str,
    ) -> Result<LabelVocabulary, ArtifactLoadError> {
        let path = source.fetch(model_id, MODEL_CONFIG_FILE)?;
        let json = read_to_string(&path)?;
        LabelVocabulary::from_config_json(&json)
            .map_err(|e| ArtifactLoadError::ModelConfig(format!("{e:#}")))
    }

    fn load_preprocessor(
        &self,
        source: &ArtifactSource,
        model_id: &str,
    ) -> Result<ImagePreprocessor, ArtifactLoadError> {
        if !source.contains(PREPROCESSOR_CONFIG_FILE) {
            warn!(model = %model_id, "No preprocessor config, using defaults");
            return Ok(ImagePreprocessor::default());
        }
        let path = source.fetch(model_id, PREPROCESSOR_CONFIG_FILE)?;
        let json = read_to_string(&path)?;
        ImagePreprocessor::from_json(&json)
            .map_err(|e| ArtifactLoadError::Preprocessor(format!("{e:#}")))
    }

    fn locate_onnx(
        &self,
        source: &ArtifactSource,
        model_id: &str,
    ) -> Result<PathBuf, ArtifactLoadError> {
        if source.contains(&self.onnx_file) {
            return source.fetch(model_id, &self.onnx_file);
        }
        if self.onnx_file != FALLBACK_ONNX_FILE && source.contains(FALLBACK_ONNX_FILE) {
            warn!(
                model = %model_id,
                configured = %self.onnx_file,
                "Configured ONNX file not found, using {}",
                FALLBACK_ONNX_FILE
            );
            return source.fetch(model_id, FALLBACK_ONNX_FILE);
        }
        Err(ArtifactLoadError::MissingFile {
            model_id: model_id.to_string(),
            file: self.onnx_file.clone(),
        })
    }

    fn build_session(&self, path: &Path) -> Result<Session, ArtifactLoadError> {
        ort::init()
            .with_name("clothing-classifier")
            .commit()
            .map_err(|e| ArtifactLoadError::Session(e.to_string()))?;

        info!(path = %path.display(), threads = self.onnx_threads, "Building ONNX session");

        Session::builder()
            .map_err(|e| ArtifactLoadError::Session(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ArtifactLoadError::Session(e.to_string()))?
            .with_intra_threads(self.onnx_threads)
            .map_err(|e| ArtifactLoadError::Session(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| ArtifactLoadError::Session(format!("{}: {e}", path.display())))
    }
}

/// Push a blank image through the full preprocess + classify path and check
/// the output has one score per label.
pub fn warm_up(
    preprocessor: &dyn Preprocess,
    classifier: &dyn Classify,
) -> Result<(), ArtifactLoadError> {
    let blank = RgbImage::new(WARM_UP_SIDE, WARM_UP_SIDE);
    let input = preprocessor.preprocess(&blank);
    let scores = classifier
        .classify(&input)
        .map_err(|e| ArtifactLoadError::Schema(e.to_string()))?;

    if scores.len() != classifier.labels().len() {
        return Err(ArtifactLoadError::Schema(format!(
            "{} scores for {} labels",
            scores.len(),
            classifier.labels().len()
        )));
    }
    info!(input_shape = ?input.shape, classes = scores.len(), "Warm-up inference passed");
    Ok(())
}

fn read_to_string(path: &Path) -> Result<String, ArtifactLoadError> {
    std::fs::read_to_string(path).map_err(|source| ArtifactLoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

//! Configuration management for the classification service

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const ENV_PREFIX: &str = "CLOTHING_CLASSIFIER";
pub const DEFAULT_MODEL_ID: &str = "wargoninnovation/wargon-clothing-classifier";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum accepted request body, in bytes
    pub max_body_bytes: usize,
}

/// Model artifact configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Hub repository id, or a path to a local artifact directory
    pub id: String,
    /// Hub revision (branch, tag or commit)
    #[serde(default = "default_revision")]
    pub revision: String,
    /// Download cache directory (hf-hub default when unset)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// ONNX export path inside the artifact
    #[serde(default = "default_onnx_file")]
    pub onnx_file: String,
    /// Number of threads for ONNX inference (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_onnx_file() -> String {
    "onnx/model.onnx".to_string()
}

fn default_onnx_threads() -> usize {
    1
}

/// Metrics reporting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Seconds between logged summaries, 0 disables the reporter
    pub report_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration: built-in defaults, then the file at `path` if it
    /// exists, then `CLOTHING_CLASSIFIER__*` environment variables.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::builder(path.as_ref())?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn builder(path: &Path) -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let defaults =
            Config::try_from(&AppConfig::default()).context("Failed to encode default configuration")?;
        Ok(Config::builder()
            .add_source(defaults)
            .add_source(File::from(path).required(false)))
    }

    /// `host:port` for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_MODEL_ID.to_string(),
            revision: default_revision(),
            cache_dir: None,
            onnx_file: default_onnx_file(),
            onnx_threads: default_onnx_threads(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
                max_body_bytes: 10 * 1024 * 1024,
            },
            model: ModelConfig::default(),
            metrics: MetricsConfig {
                report_interval_secs: 60,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

use facecheck_core::loader::{LoadLimits, DEFAULT_MAX_DIMENSION};
use facecheck_core::service::{DetectorOptions, DEFAULT_INPUT_SIZE, DEFAULT_SCORE_THRESHOLD};
use facecheck_core::DEFAULT_MATCH_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Controller configuration.
///
/// Sources, lowest precedence first: built-in defaults, an optional TOML file,
/// then `FACECHECK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory the face service loads its model artefacts from.
    pub model_dir: PathBuf,
    /// Descriptor distance below which two faces match.
    pub match_threshold: f32,
    /// Timeout in seconds for the one-time model load.
    pub model_load_timeout_secs: u64,
    /// Timeout in seconds for a single detection call.
    pub detect_timeout_secs: u64,
    /// Largest accepted image width or height.
    pub max_image_dimension: u32,
    /// Detector input resolution.
    pub detector_input_size: u32,
    /// Minimum detection score.
    pub score_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: facecheck_core::default_model_dir(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            model_load_timeout_secs: 30,
            detect_timeout_secs: 10,
            max_image_dimension: DEFAULT_MAX_DIMENSION,
            detector_input_size: DEFAULT_INPUT_SIZE,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

impl Config {
    /// Load configuration from `FACECHECK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(src)?)
    }

    /// Load `path` (if given) and apply environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => {
                let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml_str(&src)?
            }
            None => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    fn with_env_overrides(self) -> Self {
        Self {
            model_dir: std::env::var("FACECHECK_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(self.model_dir),
            match_threshold: env_f32("FACECHECK_MATCH_THRESHOLD", self.match_threshold),
            model_load_timeout_secs: env_u64(
                "FACECHECK_MODEL_LOAD_TIMEOUT_SECS",
                self.model_load_timeout_secs,
            ),
            detect_timeout_secs: env_u64("FACECHECK_DETECT_TIMEOUT_SECS", self.detect_timeout_secs),
            max_image_dimension: env_u32("FACECHECK_MAX_IMAGE_DIMENSION", self.max_image_dimension),
            detector_input_size: env_u32("FACECHECK_DETECTOR_INPUT_SIZE", self.detector_input_size),
            score_threshold: env_f32("FACECHECK_SCORE_THRESHOLD", self.score_threshold),
        }
    }

    pub fn model_load_timeout(&self) -> Duration {
        Duration::from_secs(self.model_load_timeout_secs)
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_secs(self.detect_timeout_secs)
    }

    pub fn load_limits(&self) -> LoadLimits {
        LoadLimits {
            max_dimension: self.max_image_dimension,
        }
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            input_size: self.detector_input_size,
            score_threshold: self.score_threshold,
            ..DetectorOptions::default()
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

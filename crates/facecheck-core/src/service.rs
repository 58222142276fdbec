//! Contract for the external face detection/recognition service.
//!
//! Detection, landmarking and descriptor extraction are delegated to a
//! pretrained-model provider. This module only describes what is consumed.

use crate::loader::SourceImage;
use crate::types::Detection;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default detector input resolution.
pub const DEFAULT_INPUT_SIZE: u32 = 416;

/// Default minimum detection score.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("face service unavailable: {0}")]
    Unavailable(String),
    #[error("face service timed out during {stage} after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },
    #[error("face models are not loaded")]
    NotLoaded,
    #[error("invalid detection manifest: {0}")]
    Manifest(String),
}

/// Detector family requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Single-pass lightweight detector.
    TinyFaceDetector,
}

/// Per-call detector configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorOptions {
    pub kind: DetectorKind,
    pub input_size: u32,
    pub score_threshold: f32,
    pub with_landmarks: bool,
    pub with_descriptors: bool,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            kind: DetectorKind::TinyFaceDetector,
            input_size: DEFAULT_INPUT_SIZE,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            with_landmarks: true,
            with_descriptors: true,
        }
    }
}

/// A face detection and recognition provider.
///
/// Result order is whatever the provider returns. Callers that compare the
/// first two results treat index 0 as the reference face and index 1 as the
/// probe; see [`crate::types::FacePair`].
#[async_trait]
pub trait FaceService: Send + Sync {
    /// Load model artefacts from `model_dir`. May be slow.
    async fn load_models(&self, model_dir: &Path) -> Result<(), ServiceError>;

    /// Detect every face in `image`. Returns an empty vector when none is found.
    async fn detect_faces(
        &self,
        image: &SourceImage,
        options: &DetectorOptions,
    ) -> Result<Vec<Detection>, ServiceError>;
}

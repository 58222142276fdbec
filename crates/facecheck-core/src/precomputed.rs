//! Face service backed by precomputed detections.
//!
//! Replays detections recorded by an offline model run. The manifest lives in
//! the model directory as `detections.json` and is keyed by the SHA-256 of the
//! encoded image bytes:
//!
//! ```json
//! {
//!   "model_version": "face_recognition_model",
//!   "images": {
//!     "<sha256-hex>": [
//!       { "box": {"x": 10, "y": 12, "width": 80, "height": 96},
//!         "confidence": 0.93,
//!         "descriptor": {"values": [0.01, -0.12, ...]} }
//!     ]
//!   }
//! }
//! ```

use crate::loader::SourceImage;
use crate::service::{DetectorOptions, FaceService, ServiceError};
use crate::types::Detection;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

/// Manifest file name inside the model directory.
pub const MANIFEST_FILE: &str = "detections.json";

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default)]
    images: HashMap<String, Vec<Detection>>,
}

/// [`FaceService`] that looks detections up by image digest.
#[derive(Debug, Default)]
pub struct PrecomputedFaceService {
    manifest: RwLock<Option<Manifest>>,
}

impl PrecomputedFaceService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of images in the loaded manifest, if loaded.
    pub fn image_count(&self) -> Option<usize> {
        self.manifest
            .read()
            .ok()
            .and_then(|m| m.as_ref().map(|m| m.images.len()))
    }

    fn parse(src: &str) -> Result<Manifest, ServiceError> {
        let mut manifest: Manifest =
            serde_json::from_str(src).map_err(|e| ServiceError::Manifest(e.to_string()))?;

        // Digests are matched case-insensitively.
        manifest.images = manifest
            .images
            .into_iter()
            .map(|(digest, dets)| (digest.to_ascii_lowercase(), dets))
            .collect();

        if let Some(version) = &manifest.model_version {
            for det in manifest.images.values_mut().flatten() {
                det.descriptor
                    .model_version
                    .get_or_insert_with(|| version.clone());
            }
        }

        Ok(manifest)
    }
}

#[async_trait]
impl FaceService for PrecomputedFaceService {
    async fn load_models(&self, model_dir: &Path) -> Result<(), ServiceError> {
        let path = model_dir.join(MANIFEST_FILE);
        let src = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ServiceError::Unavailable(format!("{}: {e}", path.display())))?;
        let manifest = Self::parse(&src)?;

        tracing::info!(
            path = %path.display(),
            images = manifest.images.len(),
            model_version = ?manifest.model_version,
            "loaded detection manifest"
        );

        let mut slot = self
            .manifest
            .write()
            .map_err(|_| ServiceError::Unavailable("manifest lock poisoned".into()))?;
        *slot = Some(manifest);
        Ok(())
    }

    async fn detect_faces(
        &self,
        image: &SourceImage,
        options: &DetectorOptions,
    ) -> Result<Vec<Detection>, ServiceError> {
        let slot = self
            .manifest
            .read()
            .map_err(|_| ServiceError::Unavailable("manifest lock poisoned".into()))?;
        let manifest = slot.as_ref().ok_or(ServiceError::NotLoaded)?;

        let detections: Vec<Detection> = manifest
            .images
            .get(image.digest())
            .map(|dets| {
                dets.iter()
                    .filter(|d| d.confidence >= options.score_threshold)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        tracing::debug!(
            digest = image.digest(),
            faces = detections.len(),
            "precomputed detections"
        );

        Ok(detections)
    }
}

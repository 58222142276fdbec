//! facecheck-core: Image loading, face overlays, crops and descriptor verdicts.
//!
//! Face detection and descriptor extraction are delegated to a
//! [`FaceService`] implementation; everything downstream of its output lives
//! here.

pub mod cropper;
pub mod loader;
pub mod overlay;
pub mod precomputed;
pub mod service;
pub mod types;
pub mod verdict;

use std::path::PathBuf;

pub use cropper::{extract_faces, CropError, ExtractedFace, MalformedDetection, MAX_CROP_DIMENSION};
pub use loader::{load_image, load_image_file, LoadLimits, LoaderError, SourceImage};
pub use overlay::{render_overlay, Canvas};
pub use precomputed::PrecomputedFaceService;
pub use service::{DetectorOptions, FaceService, ServiceError};
pub use types::{BoundingBox, Descriptor, Detection, FacePair, Verdict, VerificationResult};
pub use verdict::{evaluate, EuclideanMatcher, Matcher, VerdictError, DEFAULT_MATCH_THRESHOLD};

/// Default model directory: `$XDG_DATA_HOME/facecheck/models`, falling back
/// to `~/.local/share/facecheck/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facecheck")
        .join("models")
}

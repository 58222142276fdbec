//! Immutable view state and its transitions.
//!
//! Every transition takes the current snapshot by reference and returns a new
//! one; nothing is mutated in place.

use facecheck_core::{Detection, ExtractedFace, FacePair, SourceImage, VerificationResult};
use image::RgbaImage;
use std::sync::Arc;

/// Controller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No image selected.
    Idle,
    /// Image selected, no detections yet.
    ImageLoaded,
    /// A check is running.
    Detecting,
    /// Detection results are available.
    Detected,
}

/// Everything a view needs to render one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct UiState {
    pub phase: Phase,
    pub source_image: Option<SourceImage>,
    pub detections: Vec<Detection>,
    pub extracted_faces: Vec<ExtractedFace>,
    /// Source image with detection boxes drawn on top.
    pub overlay: Option<Arc<RgbaImage>>,
    pub verification: Option<VerificationResult>,
    pub pair: FacePair,
    pub is_loading: bool,
    pub last_error: Option<String>,
}

/// Products of one successful check, committed together.
#[derive(Debug, Clone)]
pub struct CheckProducts {
    pub detections: Vec<Detection>,
    pub extracted_faces: Vec<ExtractedFace>,
    pub overlay: RgbaImage,
    pub verification: Option<VerificationResult>,
    /// Set when the designated pair did not fit the detections found.
    pub pair_error: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self::initial()
    }
}

impl UiState {
    pub fn initial() -> Self {
        Self {
            phase: Phase::Idle,
            source_image: None,
            detections: Vec::new(),
            extracted_faces: Vec::new(),
            overlay: None,
            verification: None,
            pair: FacePair::POSITIONAL,
            is_loading: false,
            last_error: None,
        }
    }

    /// A new image replaces everything derived from the previous one.
    pub fn with_image(&self, image: SourceImage) -> Self {
        Self {
            phase: Phase::ImageLoaded,
            source_image: Some(image),
            ..Self::initial()
        }
    }

    /// Enter `Detecting`, dropping results of any earlier check.
    pub fn begin_check(&self) -> Self {
        Self {
            phase: Phase::Detecting,
            source_image: self.source_image.clone(),
            pair: self.pair,
            is_loading: true,
            ..Self::initial()
        }
    }

    pub fn finish_check(&self, products: CheckProducts) -> Self {
        Self {
            phase: Phase::Detected,
            source_image: self.source_image.clone(),
            detections: products.detections,
            extracted_faces: products.extracted_faces,
            overlay: Some(Arc::new(products.overlay)),
            verification: products.verification,
            pair: self.pair,
            is_loading: false,
            last_error: products.pair_error,
        }
    }

    /// A failed check keeps the image and nothing else.
    pub fn fail_check(&self, error: impl ToString) -> Self {
        Self {
            phase: Phase::ImageLoaded,
            source_image: self.source_image.clone(),
            pair: self.pair,
            last_error: Some(error.to_string()),
            ..Self::initial()
        }
    }

    pub fn with_verification(&self, pair: FacePair, verification: Option<VerificationResult>) -> Self {
        Self {
            pair,
            verification,
            ..self.clone()
        }
    }

    /// Progress text shown while a check runs.
    pub fn loading_indicator(&self) -> Option<&'static str> {
        self.is_loading.then_some("Calculating...")
    }

    pub fn distance_label(&self) -> Option<String> {
        self.verification
            .as_ref()
            .map(|v| format!("Distance: {}", v.distance))
    }

    pub fn status_label(&self) -> Option<String> {
        self.verification
            .as_ref()
            .map(|v| format!("Status: {}", v.verdict))
    }
}

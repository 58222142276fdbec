use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounding box for a detected face, in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Whole-pixel rectangle covered by this box.
    ///
    /// The origin is floored and the size truncated, matching how a raster of
    /// `width × height` is allocated for the crop. Returns `None` when any
    /// coordinate is non-finite or the box is less than one pixel wide or tall.
    pub fn pixel_rect(&self) -> Option<PixelRect> {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.width < 1.0 || self.height < 1.0 {
            return None;
        }

        Some(PixelRect {
            x: self.x.floor() as i64,
            y: self.y.floor() as i64,
            width: self.width.trunc() as u32,
            height: self.height.trunc() as u32,
        })
    }
}

/// Integer rectangle; the origin may lie outside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

/// Face descriptor vector (typically 128-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    /// Model version that produced this descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance over the shared dimensions.
    ///
    /// Callers must check lengths first; [`crate::verdict::evaluate`] does.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face located by the face service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Missing when the service returned a result without a usable box.
    #[serde(default, rename = "box")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default = "full_confidence")]
    pub confidence: f32,
    /// Facial landmark points, in source-image pixel coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<(f32, f32)>>,
    pub descriptor: Descriptor,
}

fn full_confidence() -> f32 {
    1.0
}

/// Binary match classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Matched,
    NotMatched,
}

impl Verdict {
    pub fn is_match(self) -> bool {
        self == Verdict::Matched
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Matched => f.write_str("Matched"),
            Verdict::NotMatched => f.write_str("Not Matched"),
        }
    }
}

/// Which detection is the reference face and which the probe.
///
/// Face services make no promise about result order. [`FacePair::POSITIONAL`]
/// treats the first detection as the reference (e.g. an ID document) and the
/// second as the probe (e.g. a live selfie); that is a convention, so callers
/// that know better should designate the pair explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacePair {
    pub reference: usize,
    pub probe: usize,
}

impl FacePair {
    pub const POSITIONAL: FacePair = FacePair {
        reference: 0,
        probe: 1,
    };

    pub fn new(reference: usize, probe: usize) -> Self {
        Self { reference, probe }
    }
}

impl Default for FacePair {
    fn default() -> Self {
        Self::POSITIONAL
    }
}

/// Outcome of comparing a reference descriptor with a probe descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub distance: f32,
    pub verdict: Verdict,
    pub threshold: f32,
    pub pair: FacePair,
}

//! Face crops, one PNG per well-formed detection box.

use crate::loader::{SourceImage, DEFAULT_MAX_DIMENSION};
use crate::types::{BoundingBox, Detection};
use base64::Engine;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use thiserror::Error;

/// Why a detection could not be cropped. The batch skips it and continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedDetection {
    #[error("detection has no bounding box")]
    MissingBox,
    #[error("bounding box has non-finite coordinates")]
    NonFinite,
    #[error("bounding box is smaller than one pixel")]
    Empty,
    #[error("bounding box of {width}x{height} exceeds {max} pixels per side")]
    Oversized { width: u32, height: u32, max: u32 },
}

/// Largest crop side, matching the largest source image the loader accepts
/// by default.
pub const MAX_CROP_DIMENSION: u32 = DEFAULT_MAX_DIMENSION;

#[derive(Error, Debug)]
pub enum CropError {
    #[error("failed to encode face crop: {0}")]
    Encode(#[from] image::ImageError),
}

/// A cropped face, PNG-encoded for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFace {
    /// Index of the detection this crop came from.
    pub detection_index: usize,
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

impl ExtractedFace {
    /// `data:image/png;base64,...` URL for embedding in a page.
    pub fn data_url(&self) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.png)
        )
    }
}

/// Copy the region under `bbox` into a raster of the box's size.
///
/// Parts of the box that fall outside the source stay transparent. Boxes
/// wider or taller than [`MAX_CROP_DIMENSION`] are rejected before anything
/// is allocated.
pub fn crop_face(image: &SourceImage, bbox: &BoundingBox) -> Result<RgbaImage, MalformedDetection> {
    let rect = bbox.pixel_rect().ok_or_else(|| {
        let finite = [bbox.x, bbox.y, bbox.width, bbox.height]
            .iter()
            .all(|v| v.is_finite());
        if finite {
            MalformedDetection::Empty
        } else {
            MalformedDetection::NonFinite
        }
    })?;

    if rect.width > MAX_CROP_DIMENSION || rect.height > MAX_CROP_DIMENSION {
        return Err(MalformedDetection::Oversized {
            width: rect.width,
            height: rect.height,
            max: MAX_CROP_DIMENSION,
        });
    }

    let mut face = RgbaImage::new(rect.width, rect.height);
    image::imageops::replace(&mut face, image.pixels(), -rect.x, -rect.y);
    Ok(face)
}

/// Crop and encode every well-formed detection, in detection order.
///
/// Detections without a usable box are skipped, so the output can be shorter
/// than the input; `detection_index` links each crop back to its detection.
pub fn extract_faces(
    image: &SourceImage,
    detections: &[Detection],
) -> Result<Vec<ExtractedFace>, CropError> {
    let mut faces = Vec::with_capacity(detections.len());

    for (index, detection) in detections.iter().enumerate() {
        let cropped = detection
            .bounding_box
            .as_ref()
            .ok_or(MalformedDetection::MissingBox)
            .and_then(|bbox| crop_face(image, bbox));

        let face = match cropped {
            Ok(face) => face,
            Err(reason) => {
                tracing::debug!(index, %reason, "skipping detection");
                continue;
            }
        };

        let (width, height) = face.dimensions();
        let mut png = Vec::new();
        DynamicImage::ImageRgba8(face).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        faces.push(ExtractedFace {
            detection_index: index,
            width,
            height,
            png,
        });
    }

    tracing::debug!(
        detections = detections.len(),
        extracted = faces.len(),
        "faces extracted"
    );

    Ok(faces)
}

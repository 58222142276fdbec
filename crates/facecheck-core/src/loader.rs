//! Image loading: decodes user-supplied bytes into a [`SourceImage`].

use image::RgbaImage;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Largest width or height accepted by default.
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("unreadable image file: {0}")]
    UnreadableFile(String),
    #[error("image is {width}x{height}, larger than the {max}px limit")]
    TooLarge { width: u32, height: u32, max: u32 },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Bounds applied before an image is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadLimits {
    pub max_dimension: u32,
}

impl Default for LoadLimits {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

/// The user-provided picture, decoded at its natural size.
///
/// Cloning is cheap: pixels are shared.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceImage {
    pixels: Arc<RgbaImage>,
    mime_type: &'static str,
    digest: String,
    name: Option<String>,
}

impl SourceImage {
    /// Wrap an already-decoded raster. The digest is taken over the raw pixels.
    pub fn from_rgba(pixels: RgbaImage) -> Self {
        let digest = hex_digest(pixels.as_raw());
        Self {
            pixels: Arc::new(pixels),
            mime_type: "image/png",
            digest,
            name: None,
        }
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// MIME type of the encoded input (e.g. `image/jpeg`).
    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    /// Lowercase hex SHA-256 of the encoded input bytes.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Whether a MIME type belongs to the `image/*` family.
pub fn accepts_mime(mime: &str) -> bool {
    mime.trim()
        .to_ascii_lowercase()
        .strip_prefix("image/")
        .is_some_and(|sub| !sub.is_empty())
}

/// Decode an in-memory image. The format is sniffed from content.
pub fn load_image(bytes: &[u8], limits: &LoadLimits) -> Result<SourceImage, LoaderError> {
    let format = image::guess_format(bytes)
        .map_err(|e| LoaderError::UnreadableFile(format!("unrecognised format: {e}")))?;

    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| LoaderError::UnreadableFile(e.to_string()))?;

    let (width, height) = (decoded.width(), decoded.height());
    if width == 0 || height == 0 {
        return Err(LoaderError::UnreadableFile("image dimensions are zero".into()));
    }
    if width > limits.max_dimension || height > limits.max_dimension {
        return Err(LoaderError::TooLarge {
            width,
            height,
            max: limits.max_dimension,
        });
    }

    let image = SourceImage {
        pixels: Arc::new(decoded.into_rgba8()),
        mime_type: format.to_mime_type(),
        digest: hex_digest(bytes),
        name: None,
    };

    tracing::debug!(
        width,
        height,
        mime = image.mime_type,
        digest = %image.digest,
        "image loaded"
    );

    Ok(image)
}

/// Read and decode an image file. The file name is kept for display.
pub fn load_image_file(path: &Path, limits: &LoadLimits) -> Result<SourceImage, LoaderError> {
    let bytes = std::fs::read(path).map_err(|source| LoaderError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let image = load_image(&bytes, limits)?;
    Ok(match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => image.with_name(name),
        None => image,
    })
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

//! Detection overlay: the source image with one stroked box per face.

use crate::loader::SourceImage;
use crate::types::{BoundingBox, Detection};
use image::{Rgba, RgbaImage};
use imageproc::rect::Rect;

/// Box stroke colour (`#00FF00`).
pub const OVERLAY_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);

/// Box stroke width in pixels, centred on the box edge.
pub const OVERLAY_STROKE_WIDTH: u32 = 2;

/// Drawing surface the overlay is rendered onto.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    surface: RgbaImage,
}

impl Canvas {
    /// Transparent canvas of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: RgbaImage::new(width, height),
        }
    }

    /// Canvas sized to the natural dimensions of `image`.
    pub fn for_image(image: &SourceImage) -> Self {
        Self::new(image.width(), image.height())
    }

    pub fn width(&self) -> u32 {
        self.surface.width()
    }

    pub fn height(&self) -> u32 {
        self.surface.height()
    }

    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    pub fn into_image(self) -> RgbaImage {
        self.surface
    }

    /// Clear, draw `image` at the origin, then stroke every well-formed box.
    ///
    /// Prior content never survives, so repeated calls with the same inputs
    /// produce the same pixels.
    pub fn render_overlay(&mut self, image: &SourceImage, detections: &[Detection]) {
        self.clear();
        image::imageops::replace(&mut self.surface, image.pixels(), 0, 0);

        for bbox in detections.iter().filter_map(|d| d.bounding_box.as_ref()) {
            self.stroke_box(bbox);
        }
    }

    fn clear(&mut self) {
        for pixel in self.surface.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    /// A centred 2px stroke covers one pixel ring just outside the box and
    /// one just inside it.
    fn stroke_box(&mut self, bbox: &BoundingBox) {
        let Some(rect) = bbox.pixel_rect() else {
            tracing::debug!(?bbox, "overlay: skipping malformed box");
            return;
        };

        let half = (OVERLAY_STROKE_WIDTH / 2) as i64;
        for inset in -half..(OVERLAY_STROKE_WIDTH as i64 - half) {
            let width = rect.width as i64 - 2 * inset;
            let height = rect.height as i64 - 2 * inset;
            if width < 1 || height < 1 {
                break;
            }
            let ring = (
                rect.x + inset,
                rect.y + inset,
                rect.x + inset + width - 1,
                rect.y + inset + height - 1,
            );
            if let Some(ring) = self.clip_ring(ring) {
                imageproc::drawing::draw_hollow_rect_mut(&mut self.surface, ring, OVERLAY_COLOR);
            }
        }
    }

    /// Clip a ring given by inclusive edges to one pixel past each side of
    /// the surface. Edges pulled in by the clip land off-surface, so only the
    /// visible parts of the ring are drawn and the result fits in `i32`.
    fn clip_ring(&self, (left, top, right, bottom): (i64, i64, i64, i64)) -> Option<Rect> {
        let left = left.max(-1);
        let top = top.max(-1);
        let right = right.min(self.surface.width() as i64);
        let bottom = bottom.min(self.surface.height() as i64);
        if left > right || top > bottom {
            return None;
        }

        let x = i32::try_from(left).ok()?;
        let y = i32::try_from(top).ok()?;
        let width = u32::try_from(right - left + 1).ok()?;
        let height = u32::try_from(bottom - top + 1).ok()?;
        Some(Rect::at(x, y).of_size(width, height))
    }
}

/// Render the overlay for `detections` onto `canvas`.
pub fn render_overlay(canvas: &mut Canvas, image: &SourceImage, detections: &[Detection]) {
    canvas.render_overlay(image, detections);
}

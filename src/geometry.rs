//! Display-surface geometry.
//!
//! A caller shows a video letterboxed on a canvas and lets the user drag a
//! rectangle over it. [`DisplayTransform`] maps points between the canvas and
//! source pixel space, and [`normalize_rect`] turns two dragged corners into a
//! [`CropRegion`] that fits inside the frame.
//!
//! Source coordinates are continuous: the right edge of the last pixel
//! column is `video_width`, so dragging across the whole image selects the
//! whole frame.

use std::fmt;

use crate::error::FramecutError;

/// A point in canvas or source space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    /// Horizontal coordinate, growing rightwards.
    pub x: f64,
    /// Vertical coordinate, growing downwards.
    pub y: f64,
}

impl Point {
    /// Create a point.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle on the display surface.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CanvasRect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width in canvas units.
    pub width: f64,
    /// Height in canvas units.
    pub height: f64,
}

/// A rectangle in source pixel space defining the part of each frame to keep.
///
/// # Example
///
/// ```
/// use framecut::CropRegion;
///
/// let region = CropRegion::new(10, 10, 101, 50).even_adjusted();
/// assert_eq!((region.width, region.height), (100, 50));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CropRegion {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl CropRegion {
    /// Create a region.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The region covering a whole `width` x `height` frame.
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Returns `true` if the region covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Round width and height down to even values, as required by 4:2:0
    /// chroma subsampling.
    pub fn even_adjusted(self) -> Self {
        Self {
            width: self.width - self.width % 2,
            height: self.height - self.height % 2,
            ..self
        }
    }

    /// Check that the region is non-empty and fits in a frame of the given
    /// size.
    ///
    /// # Errors
    ///
    /// Returns [`FramecutError::InvalidCropRegion`] describing the violation.
    pub fn validate(&self, frame_width: u32, frame_height: u32) -> Result<(), FramecutError> {
        let reject = |reason: String| FramecutError::InvalidCropRegion {
            region: self.to_string(),
            reason,
        };

        if self.is_empty() {
            return Err(reject("width and height must be positive".to_string()));
        }
        if u64::from(self.x) + u64::from(self.width) > u64::from(frame_width)
            || u64::from(self.y) + u64::from(self.height) > u64::from(frame_height)
        {
            return Err(reject(format!(
                "exceeds the {frame_width}x{frame_height} frame"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for CropRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Placement of a video scaled to fit a display surface.
///
/// The image is scaled uniformly by `min(canvas_w / video_w, canvas_h /
/// video_h)` and centered; the displayed size is rounded down to whole canvas
/// units and so are the offsets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayTransform {
    /// Canvas units per source pixel.
    pub scale: f64,
    /// Horizontal offset of the image on the canvas.
    pub offset_x: f64,
    /// Vertical offset of the image on the canvas.
    pub offset_y: f64,
    video_width: u32,
    video_height: u32,
}

impl DisplayTransform {
    /// Compute the transform for a video shown on a canvas.
    ///
    /// # Errors
    ///
    /// Returns [`FramecutError::InvalidDimensions`] if any dimension is zero.
    pub fn new(
        video_width: u32,
        video_height: u32,
        canvas_width: u32,
        canvas_height: u32,
    ) -> Result<Self, FramecutError> {
        if video_width == 0 || video_height == 0 || canvas_width == 0 || canvas_height == 0 {
            return Err(FramecutError::InvalidDimensions {
                video_width,
                video_height,
                canvas_width,
                canvas_height,
            });
        }

        let scale_x = f64::from(canvas_width) / f64::from(video_width);
        let scale_y = f64::from(canvas_height) / f64::from(video_height);
        let scale = scale_x.min(scale_y);

        let displayed_width = (f64::from(video_width) * scale).floor();
        let displayed_height = (f64::from(video_height) * scale).floor();

        Ok(Self {
            scale,
            offset_x: ((f64::from(canvas_width) - displayed_width) / 2.0).floor(),
            offset_y: ((f64::from(canvas_height) - displayed_height) / 2.0).floor(),
            video_width,
            video_height,
        })
    }

    /// Source frame width this transform was built for.
    pub fn video_width(&self) -> u32 {
        self.video_width
    }

    /// Source frame height this transform was built for.
    pub fn video_height(&self) -> u32 {
        self.video_height
    }

    /// Map a canvas point to source space, clamped to the frame.
    pub fn canvas_to_source(&self, point: Point) -> Point {
        Point {
            x: ((point.x - self.offset_x) / self.scale).clamp(0.0, f64::from(self.video_width)),
            y: ((point.y - self.offset_y) / self.scale).clamp(0.0, f64::from(self.video_height)),
        }
    }

    /// Map a source point onto the canvas.
    pub fn source_point_to_canvas(&self, point: Point) -> Point {
        Point {
            x: point.x * self.scale + self.offset_x,
            y: point.y * self.scale + self.offset_y,
        }
    }

    /// Map a source region onto the canvas, e.g. to redraw a selection.
    pub fn source_to_canvas(&self, region: &CropRegion) -> CanvasRect {
        let origin = self.source_point_to_canvas(Point::new(
            f64::from(region.x),
            f64::from(region.y),
        ));
        CanvasRect {
            x: origin.x,
            y: origin.y,
            width: f64::from(region.width) * self.scale,
            height: f64::from(region.height) * self.scale,
        }
    }
}

/// Build a crop region from two corners given in source space, in any order.
///
/// Each coordinate is clamped to the frame first, so the result always fits
/// inside a `video_width` x `video_height` frame. Equal corners give an empty
/// region; whether that is acceptable is up to the caller.
pub fn normalize_rect(first: Point, second: Point, video_width: u32, video_height: u32) -> CropRegion {
    let clamp_x = |value: f64| value.clamp(0.0, f64::from(video_width));
    let clamp_y = |value: f64| value.clamp(0.0, f64::from(video_height));

    let (x1, x2) = min_max(clamp_x(first.x), clamp_x(second.x));
    let (y1, y2) = min_max(clamp_y(first.y), clamp_y(second.y));

    // Truncating both the origin and the extent keeps x + width <= x2.
    CropRegion {
        x: x1 as u32,
        y: y1 as u32,
        width: (x2 - x1) as u32,
        height: (y2 - y1) as u32,
    }
}

fn min_max(a: f64, b: f64) -> (f64, f64) {
    if a <= b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterboxed_offsets() {
        // 1920x1080 on 800x600: scale is width-bound, image centered vertically.
        let transform = DisplayTransform::new(1920, 1080, 800, 600).unwrap();
        assert!((transform.scale - 800.0 / 1920.0).abs() < 1e-12);
        assert_eq!(transform.offset_x, 0.0);
        assert_eq!(transform.offset_y, 75.0);
    }

    #[test]
    fn even_adjustment_is_idempotent() {
        let region = CropRegion::new(0, 0, 7, 9).even_adjusted();
        assert_eq!(region, CropRegion::new(0, 0, 6, 8));
        assert_eq!(region.even_adjusted(), region);
    }
}

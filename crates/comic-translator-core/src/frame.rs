//! The processing coordinate frame.
//!
//! A [`CoordinateFrame`] describes the single surface a page is detected,
//! displayed, erased and lettered on. Source pixels map into it with one
//! affine transform:
//!
//! ```text
//! frame = source * scale + offset
//! ```
//!
//! Scaling always uses the *fit* policy (the minimum of the per-axis ratios),
//! so the whole source is visible and nothing is cropped. A fill/crop policy
//! would desynchronize region coordinates from the detected frame and is not
//! offered.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::{Point, Polygon};

/// Bounds and behavior used to fit a source image into the processing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitPolicy {
    /// Maximum frame width in pixels (`None` = unbounded)
    #[serde(default)]
    pub max_width: Option<u32>,
    /// Maximum frame height in pixels (`None` = unbounded)
    #[serde(default)]
    pub max_height: Option<u32>,
    /// Allow scaling small images up to the bounds
    #[serde(default)]
    pub allow_upscale: bool,
    /// Pad each bounded axis to exactly its bound, centering the content
    #[serde(default)]
    pub pad_to_bounds: bool,
}

impl FitPolicy {
    /// Fit within a maximum width only (the OCR default).
    pub const fn max_width(width: u32) -> Self {
        Self {
            max_width: Some(width),
            max_height: None,
            allow_upscale: false,
            pad_to_bounds: false,
        }
    }

    /// Fit within a box on both axes.
    pub const fn within(width: u32, height: u32) -> Self {
        Self {
            max_width: Some(width),
            max_height: Some(height),
            allow_upscale: false,
            pad_to_bounds: false,
        }
    }

    /// Keep the source untouched.
    pub const fn identity() -> Self {
        Self {
            max_width: None,
            max_height: None,
            allow_upscale: false,
            pad_to_bounds: false,
        }
    }
}

impl Default for FitPolicy {
    fn default() -> Self {
        Self::max_width(2000)
    }
}

/// Dimensions of the source image and processing frame plus the transform
/// between them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinateFrame {
    pub source_width: u32,
    pub source_height: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl CoordinateFrame {
    /// Compute the frame for a source of `(width, height)` under `policy`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn compute(source_dims: (u32, u32), policy: &FitPolicy) -> Result<Self> {
        let (width, height) = source_dims;
        if width == 0 || height == 0 {
            return Err(Error::InvalidImage(format!(
                "source has zero size ({width}x{height})"
            )));
        }
        if policy.max_width == Some(0) || policy.max_height == Some(0) {
            return Err(Error::ConfigInvalid {
                field: "preprocess.fit".to_string(),
                reason: "frame bounds must be positive".to_string(),
            });
        }

        let ratio_x = policy
            .max_width
            .map_or(f64::INFINITY, |mw| f64::from(mw) / f64::from(width));
        let ratio_y = policy
            .max_height
            .map_or(f64::INFINITY, |mh| f64::from(mh) / f64::from(height));

        // Fit: the smaller ratio keeps both axes inside their bounds.
        let mut scale = ratio_x.min(ratio_y);
        if !scale.is_finite() {
            scale = 1.0;
        }
        if !policy.allow_upscale {
            scale = scale.min(1.0);
        }

        let content_w = scaled_len(width, scale, policy.max_width);
        let content_h = scaled_len(height, scale, policy.max_height);

        let (frame_width, offset_x) = padded_axis(content_w, policy.max_width, policy.pad_to_bounds);
        let (frame_height, offset_y) = padded_axis(content_h, policy.max_height, policy.pad_to_bounds);

        Ok(Self {
            source_width: width,
            source_height: height,
            frame_width,
            frame_height,
            scale,
            offset_x,
            offset_y,
        })
    }

    /// Size of the scaled source content inside the frame (excluding padding).
    pub fn content_size(&self) -> (u32, u32) {
        (
            scaled_len(self.source_width, self.scale, Some(self.frame_width)),
            scaled_len(self.source_height, self.scale, Some(self.frame_height)),
        )
    }

    /// Map a source pixel into the frame.
    pub fn to_frame(&self, p: Point) -> Point {
        Point::new(
            p.x.mul_add(self.scale, self.offset_x),
            p.y.mul_add(self.scale, self.offset_y),
        )
    }

    /// Map a frame pixel back into the source.
    pub fn to_source(&self, p: Point) -> Point {
        Point::new(
            (p.x - self.offset_x) / self.scale,
            (p.y - self.offset_y) / self.scale,
        )
    }

    /// Map every vertex of a source-space polygon into the frame.
    pub fn polygon_to_frame(&self, polygon: &Polygon) -> Polygon {
        polygon.map(|p| self.to_frame(p))
    }

    /// Map every vertex of a frame-space polygon back into the source.
    pub fn polygon_to_source(&self, polygon: &Polygon) -> Polygon {
        polygon.map(|p| self.to_source(p))
    }

    /// Whether `p` lies inside the frame (edges inclusive).
    pub fn contains(&self, p: Point) -> bool {
        p.is_finite()
            && p.x >= 0.0
            && p.y >= 0.0
            && p.x <= f64::from(self.frame_width)
            && p.y <= f64::from(self.frame_height)
    }

    pub const fn frame_dims(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    /// Same dimensions and the same transform up to float noise from a
    /// serialization round trip.
    pub fn matches(&self, other: &Self) -> bool {
        const EPS: f64 = 1e-9;
        self.source_width == other.source_width
            && self.source_height == other.source_height
            && self.frame_dims() == other.frame_dims()
            && (self.scale - other.scale).abs() <= EPS * self.scale.abs().max(1.0)
            && (self.offset_x - other.offset_x).abs() <= EPS
            && (self.offset_y - other.offset_y).abs() <= EPS
    }
}

/// Scaled length of one axis, rounded and kept within `bound`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scaled_len(len: u32, scale: f64, bound: Option<u32>) -> u32 {
    let scaled = (f64::from(len) * scale).round().max(1.0) as u32;
    bound.map_or(scaled, |b| scaled.min(b))
}

/// Frame length and centering offset for one axis.
fn padded_axis(content: u32, bound: Option<u32>, pad: bool) -> (u32, f64) {
    match bound {
        Some(b) if pad && b > content => (b, f64::from((b - content) / 2)),
        _ => (content, 0.0),
    }
}

//! Deterministic production of the processing-frame image.
//!
//! Every consumer that needs to look at a page (preview, detection, erasure,
//! lettering) goes through [`PreprocessPipeline::process`]. There is no second
//! resize path, so the surface a human sees is always the surface regions
//! were detected on.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::frame::{CoordinateFrame, FitPolicy};

/// Resampling filter used when scaling into the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    #[default]
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => Self::Nearest,
            ResizeFilter::Triangle => Self::Triangle,
            ResizeFilter::CatmullRom => Self::CatmullRom,
            ResizeFilter::Lanczos3 => Self::Lanczos3,
        }
    }
}

/// Preprocessing parameters. Any change here produces a different frame and
/// invalidates regions detected under the old parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessOptions {
    /// Fit policy for the processing frame
    #[serde(default)]
    pub fit: FitPolicy,
    /// Convert to grayscale before detection (kept as 3-channel RGB)
    #[serde(default)]
    pub grayscale: bool,
    /// Resampling filter
    #[serde(default)]
    pub filter: ResizeFilter,
    /// Color used for padding when `fit.pad_to_bounds` is set
    #[serde(default = "default_pad_color")]
    pub pad_color: [u8; 3],
}

const fn default_pad_color() -> [u8; 3] {
    [255, 255, 255]
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            fit: FitPolicy::default(),
            grayscale: false,
            filter: ResizeFilter::default(),
            pad_color: default_pad_color(),
        }
    }
}

/// Turns source page images into processing-frame images.
#[derive(Debug, Clone, Default)]
pub struct PreprocessPipeline {
    options: PreprocessOptions,
}

impl PreprocessPipeline {
    pub const fn new(options: PreprocessOptions) -> Self {
        Self { options }
    }

    pub const fn options(&self) -> &PreprocessOptions {
        &self.options
    }

    /// Frame metadata for a source of the given dimensions, without touching
    /// pixels.
    pub fn frame_for(&self, source_dims: (u32, u32)) -> Result<CoordinateFrame> {
        CoordinateFrame::compute(source_dims, &self.options.fit)
    }

    /// Frame metadata for an image file, reading only its header.
    pub fn frame_for_path(&self, path: &Path) -> Result<CoordinateFrame> {
        let dims = image::image_dimensions(path).map_err(|e| Error::ImageRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        self.frame_for(dims)
    }

    /// Produce the frame image and its coordinate frame.
    pub fn process(&self, source: &DynamicImage) -> Result<(RgbImage, CoordinateFrame)> {
        let frame = self.frame_for((source.width(), source.height()))?;

        let rgb = if self.options.grayscale {
            DynamicImage::ImageLuma8(source.to_luma8()).to_rgb8()
        } else {
            source.to_rgb8()
        };

        let (content_w, content_h) = frame.content_size();
        let content = if (content_w, content_h) == (rgb.width(), rgb.height()) {
            rgb
        } else {
            imageops::resize(&rgb, content_w, content_h, self.options.filter.into())
        };

        let image = if frame.frame_dims() == (content_w, content_h) {
            content
        } else {
            let mut canvas =
                RgbImage::from_pixel(frame.frame_width, frame.frame_height, Rgb(self.options.pad_color));
            // Offsets are whole pixels by construction.
            #[allow(clippy::cast_possible_truncation)]
            imageops::replace(&mut canvas, &content, frame.offset_x as i64, frame.offset_y as i64);
            canvas
        };

        debug!(
            "Preprocessed {}x{} -> {}x{} (scale {:.4})",
            frame.source_width, frame.source_height, frame.frame_width, frame.frame_height, frame.scale
        );

        Ok((image, frame))
    }

    /// Load an image file and produce its frame image.
    pub fn process_path(&self, path: &Path) -> Result<(RgbImage, CoordinateFrame)> {
        let source = load_image(path)?;
        self.process(&source)
    }
}

/// Open and decode an image file.
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|e| Error::ImageRead {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

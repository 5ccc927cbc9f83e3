//! Erasure and lettering engines.
//!
//! Both engines work on the processing-frame image with region polygons in
//! frame coordinates. They are synchronous CPU work; callers run them on a
//! blocking thread.

mod erase;
mod font;
mod layout;
mod outline;

pub use erase::BackgroundFillEraser;
pub use font::{FontResource, FALLBACK_FAMILIES};
pub use layout::{fit_text, LaidOutLine, TextLayout, TextMeasure};
pub use outline::OutlineRenderer;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::config::{Margins, RenderConfig, TextColor};
use crate::error::Result;
use crate::geometry::Polygon;

/// Removes original text pixels inside a region.
pub trait Eraser: Send + Sync {
    fn erase(&self, image: &mut RgbImage, polygon: &Polygon) -> Result<()>;
}

/// Draws text inside a region.
pub trait TextRenderer: Send + Sync {
    /// Draw `text` fitted inside `polygon`. A renderer that needs a font
    /// reports [`crate::Error::ResourceMissing`] when `font` is `None`.
    fn draw_text(
        &self,
        image: &mut RgbImage,
        polygon: &Polygon,
        text: &str,
        font: Option<&FontResource>,
        style: &TextStyle,
    ) -> Result<()>;
}

/// Per-region adjustments layered over the configured style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<TextColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margins: Option<Margins>,
}

impl StyleOverrides {
    pub const fn is_empty(&self) -> bool {
        self.font_size.is_none() && self.color.is_none() && self.margins.is_none()
    }
}

/// Resolved lettering style for one region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub margins: Margins,
    pub color: TextColor,
    pub min_font_size: f32,
    pub max_font_size: f32,
    pub line_spacing: f32,
    /// Fixed size; skips the auto-size search
    pub font_size: Option<f32>,
}

impl TextStyle {
    pub const fn from_config(config: &RenderConfig) -> Self {
        Self {
            margins: config.margins,
            color: config.text_color,
            min_font_size: config.min_font_size,
            max_font_size: config.max_font_size,
            line_spacing: config.line_spacing,
            font_size: None,
        }
    }

    /// This style with `overrides` applied on top.
    #[must_use]
    pub fn with_overrides(&self, overrides: &StyleOverrides) -> Self {
        Self {
            margins: overrides.margins.unwrap_or(self.margins),
            color: overrides.color.unwrap_or(self.color),
            font_size: overrides.font_size.or(self.font_size),
            ..*self
        }
    }
}

impl Default for TextStyle {
    fn default() -> Self {
        Self::from_config(&RenderConfig::default())
    }
}

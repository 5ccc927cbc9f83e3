//! Page and region model plus the page status machine.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::detect::Detection;
use crate::frame::CoordinateFrame;
use crate::geometry::Polygon;
use crate::render::StyleOverrides;

/// A detected text area in processing-frame coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    pub id: u32,
    pub polygon: Polygon,
    pub ocr_text: String,
    pub confidence: f32,
    #[serde(default)]
    pub translated_text: Option<String>,
    #[serde(default)]
    pub translation_error: Option<String>,
    /// Why lettering was skipped for this region on the last render
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_error: Option<String>,
    #[serde(default, skip_serializing_if = "StyleOverrides::is_empty")]
    pub style_overrides: StyleOverrides,
}

impl TextRegion {
    pub fn from_detection(id: u32, detection: Detection) -> Self {
        Self {
            id,
            polygon: detection.polygon,
            ocr_text: detection.text,
            confidence: detection.confidence,
            translated_text: None,
            translation_error: None,
            render_error: None,
            style_overrides: StyleOverrides::default(),
        }
    }

    pub const fn is_translated(&self) -> bool {
        self.translated_text.is_some()
    }
}

/// Processing stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Detection,
    Translation,
    Erasure,
    Render,
    Finalize,
}

impl Stage {
    /// Status a page resumes from after this stage failed.
    pub const fn resume_status(self) -> ProcessingStatus {
        match self {
            Self::Detection => ProcessingStatus::Pending,
            Self::Translation => ProcessingStatus::Detected,
            Self::Erasure => ProcessingStatus::Translated,
            Self::Render => ProcessingStatus::Erased,
            Self::Finalize => ProcessingStatus::Rendered,
        }
    }

    /// Status reached when this stage succeeds.
    pub const fn completed_status(self) -> ProcessingStatus {
        match self {
            Self::Detection => ProcessingStatus::Detected,
            Self::Translation => ProcessingStatus::Translated,
            Self::Erasure => ProcessingStatus::Erased,
            Self::Render => ProcessingStatus::Rendered,
            Self::Finalize => ProcessingStatus::Done,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Detection => "detection",
            Self::Translation => "translation",
            Self::Erasure => "erasure",
            Self::Render => "render",
            Self::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Where a page is in `Pending → Detected → Translated → Erased → Rendered →
/// Done`, or the stage it failed at.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Detected,
    Translated,
    Erased,
    Rendered,
    Done,
    Errored { stage: Stage, message: String },
}

impl ProcessingStatus {
    /// The stage that moves a page out of this status.
    pub const fn next_stage(&self) -> Option<Stage> {
        match self {
            Self::Pending => Some(Stage::Detection),
            Self::Detected => Some(Stage::Translation),
            Self::Translated => Some(Stage::Erasure),
            Self::Erased => Some(Stage::Render),
            Self::Rendered => Some(Stage::Finalize),
            Self::Done | Self::Errored { .. } => None,
        }
    }

    /// Position along the happy path; errored pages rank at their resume
    /// point.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Detected => 1,
            Self::Translated => 2,
            Self::Erased => 3,
            Self::Rendered => 4,
            Self::Done => 5,
            Self::Errored { stage, .. } => stage.resume_status().rank(),
        }
    }

    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    pub const fn is_errored(&self) -> bool {
        matches!(self, Self::Errored { .. })
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Detected => f.write_str("detected"),
            Self::Translated => f.write_str("translated"),
            Self::Erased => f.write_str("erased"),
            Self::Rendered => f.write_str("rendered"),
            Self::Done => f.write_str("done"),
            Self::Errored { stage, message } => write!(f, "errored at {stage}: {message}"),
        }
    }
}

/// One comic page and everything derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub index: usize,
    pub name: String,
    pub source_image_ref: PathBuf,
    #[serde(default)]
    pub coordinate_frame: Option<CoordinateFrame>,
    #[serde(default)]
    pub regions: Vec<TextRegion>,
    #[serde(default)]
    pub erased_image_ref: Option<PathBuf>,
    #[serde(default)]
    pub rendered_image_ref: Option<PathBuf>,
    #[serde(default)]
    pub processing_status: ProcessingStatus,
}

impl Page {
    pub fn new(index: usize, source: impl Into<PathBuf>) -> Self {
        let source_image_ref = source.into();
        let name = source_image_ref
            .file_name()
            .map_or_else(|| format!("page_{index:03}"), |n| n.to_string_lossy().into_owned());
        Self {
            index,
            name,
            source_image_ref,
            coordinate_frame: None,
            regions: Vec::new(),
            erased_image_ref: None,
            rendered_image_ref: None,
            processing_status: ProcessingStatus::Pending,
        }
    }

    /// File stem used for exported artifacts.
    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map_or_else(|| format!("page_{:03}", self.index), |s| s.to_string_lossy().into_owned())
    }

    /// Whether the page has completed `status` (or something later).
    pub fn has_reached(&self, status: &ProcessingStatus) -> bool {
        !self.processing_status.is_errored() && self.processing_status.rank() >= status.rank()
    }

    /// Drop everything derived from the old coordinate frame.
    pub fn invalidate(&mut self) {
        self.coordinate_frame = None;
        self.regions.clear();
        self.erased_image_ref = None;
        self.rendered_image_ref = None;
        self.processing_status = ProcessingStatus::Pending;
    }

    /// Send a lettered page back to `Erased` so its text is drawn again.
    pub fn rerender(&mut self) -> bool {
        if self.has_reached(&ProcessingStatus::Rendered) {
            self.rendered_image_ref = None;
            self.processing_status = ProcessingStatus::Erased;
            true
        } else {
            false
        }
    }

    /// Send a page with regions whose translation failed back to `Detected`,
    /// so the next run asks the translator again for just those regions.
    pub fn retry_failed_translations(&mut self) -> bool {
        let failed = self
            .regions
            .iter()
            .any(|r| r.translated_text.is_none() && r.translation_error.is_some());
        if failed && self.has_reached(&ProcessingStatus::Translated) {
            self.rendered_image_ref = None;
            self.processing_status = ProcessingStatus::Detected;
            true
        } else {
            false
        }
    }

    /// Forget every region translation, e.g. after the language pair changed.
    /// Pages past detection go back to `Detected`; returns whether this page
    /// had anything to redo.
    pub fn discard_translations(&mut self) -> bool {
        let had_any = self
            .regions
            .iter()
            .any(|r| r.translated_text.is_some() || r.translation_error.is_some());
        for region in &mut self.regions {
            region.translated_text = None;
            region.translation_error = None;
            region.render_error = None;
        }
        if self.has_reached(&ProcessingStatus::Translated) {
            self.rendered_image_ref = None;
            self.processing_status = ProcessingStatus::Detected;
            return true;
        }
        had_any
    }

    /// Replace a region's translation by hand. Already-lettered pages are
    /// sent back to `Erased`. Returns `false` for an unknown region id.
    pub fn edit_translation(&mut self, region_id: u32, text: impl Into<String>) -> bool {
        let Some(region) = self.regions.iter_mut().find(|r| r.id == region_id) else {
            return false;
        };
        region.translated_text = Some(text.into());
        region.translation_error = None;
        self.rerender();
        true
    }

    /// Replace a region's style overrides. Already-lettered pages are sent
    /// back to `Erased`.
    pub fn set_style_overrides(&mut self, region_id: u32, overrides: StyleOverrides) -> bool {
        let Some(region) = self.regions.iter_mut().find(|r| r.id == region_id) else {
            return false;
        };
        region.style_overrides = overrides;
        self.rerender();
        true
    }
}

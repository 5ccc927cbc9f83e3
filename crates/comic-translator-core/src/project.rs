//! Chapter persistence.
//!
//! A project file is a JSON envelope around the full chapter:
//!
//! ```json
//! { "format_version": 1, "chapter": { ... } }
//! ```
//!
//! Writes replace the file atomically, so a crash mid-save leaves the last
//! complete snapshot on disk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chapter::Chapter;
use crate::error::{Error, Result};
use crate::util::write_atomic;

/// Current project file format.
pub const FORMAT_VERSION: u32 = 1;

/// Default project file name inside an output directory.
pub const PROJECT_FILE_NAME: &str = "project.json";

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    format_version: u32,
    chapter: &'a Chapter,
}

#[derive(Deserialize)]
struct Header {
    format_version: u32,
}

#[derive(Deserialize)]
struct Envelope {
    chapter: Chapter,
}

/// Reads and writes one chapter's project file.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    path: PathBuf,
}

impl ProjectStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<dir>/project.json`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(PROJECT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Serialize `chapter` into a project document.
    pub fn save(chapter: &Chapter) -> Result<String> {
        serde_json::to_string_pretty(&EnvelopeRef {
            format_version: FORMAT_VERSION,
            chapter,
        })
        .map_err(|e| Error::Persistence(format!("Failed to serialize chapter: {e}")))
    }

    /// Parse a project document, rejecting versions we do not know.
    pub fn load(json: &str) -> Result<Chapter> {
        let header: Header = serde_json::from_str(json)
            .map_err(|e| Error::ProjectFormat(format!("missing format_version: {e}")))?;
        if header.format_version != FORMAT_VERSION {
            return Err(Error::ProjectFormat(format!(
                "unsupported format_version {} (expected {FORMAT_VERSION})",
                header.format_version
            )));
        }

        let envelope: Envelope =
            serde_json::from_str(json).map_err(|e| Error::ProjectFormat(e.to_string()))?;
        Ok(envelope.chapter)
    }

    /// Write `chapter` to the project file.
    pub fn persist(&self, chapter: &Chapter) -> Result<()> {
        let json = Self::save(chapter)?;
        write_atomic(&self.path, json.as_bytes())?;
        debug!("Saved chapter '{}' to {}", chapter.name, self.path.display());
        Ok(())
    }

    /// Read the chapter back from the project file.
    pub fn restore(&self) -> Result<Chapter> {
        let json = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Persistence(format!("Failed to read {}: {e}", self.path.display()))
        })?;
        Self::load(&json)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{Lang, Margins, TextColor};
    use crate::detect::Detection;
    use crate::frame::{CoordinateFrame, FitPolicy};
    use crate::geometry::Polygon;
    use crate::page::{Page, ProcessingStatus, Stage, TextRegion};
    use crate::render::StyleOverrides;

    fn sample_chapter() -> Chapter {
        let mut first = Page::new(0, "/comics/ch1/001.png");
        first.coordinate_frame =
            Some(CoordinateFrame::compute((2481, 3508), &FitPolicy::max_width(2000)).unwrap());
        let mut region = TextRegion::from_detection(
            0,
            Detection::new(
                Polygon::from_pairs(&[(10.5, 10.0), (100.0, 10.0), (100.0, 40.25), (10.5, 40.25)]),
                "Hello",
                0.87,
            ),
        );
        region.translated_text = Some("Bonjour".into());
        region.style_overrides = StyleOverrides {
            font_size: Some(18.0),
            color: Some(TextColor::dark_red()),
            margins: Some(Margins::new(0.05, 0.2)),
        };
        let mut failed = region.clone();
        failed.id = 1;
        failed.translated_text = None;
        failed.translation_error = Some("translation rate limited".into());
        first.regions = vec![region, failed];
        first.processing_status = ProcessingStatus::Translated;

        let mut second = Page::new(1, "/comics/ch1/002.png");
        second.processing_status = ProcessingStatus::Errored {
            stage: Stage::Detection,
            message: "detection request failed: 503".into(),
        };

        let mut chapter = Chapter::new("Chapter 1", vec![first, second], Lang::new("en"), Lang::new("fr"));
        chapter.font_selection = Some(PathBuf::from("/fonts/comic.ttf"));
        chapter
    }

    #[test]
    fn test_save_load_round_trip() {
        let chapter = sample_chapter();
        let json = ProjectStore::save(&chapter).unwrap();
        let loaded = ProjectStore::load(&json).unwrap();
        assert_eq!(loaded, chapter);
        assert!(json.contains("\"format_version\": 1"));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let json = ProjectStore::save(&sample_chapter())
            .unwrap()
            .replace("\"format_version\": 1", "\"format_version\": 99");
        let err = ProjectStore::load(&json).unwrap_err();
        assert!(matches!(err, Error::ProjectFormat(_)));
        assert!(ProjectStore::load("{\"chapter\": {}}").is_err());
    }

    #[test]
    fn test_persist_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::in_dir(dir.path());
        assert!(!store.exists());

        let chapter = sample_chapter();
        store.persist(&chapter).unwrap();
        assert!(store.exists());
        assert_eq!(store.restore().unwrap(), chapter);
    }

    #[test]
    fn test_restore_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::in_dir(&dir.path().join("nope"));
        assert!(matches!(store.restore().unwrap_err(), Error::Persistence(_)));
    }
}

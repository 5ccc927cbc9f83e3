//! Comic Translator Core Library
//!
//! This library provides the core functionality for translating comic pages:
//! - Deterministic preprocessing into a single processing frame
//! - Text detection via an OCR service, with line merging
//! - Translation via OpenAI-compatible or DeepL APIs, memoized in memory and on disk
//! - Erasure of the original lettering and re-lettering inside each region
//! - Resumable chapter runs persisted as a project file
//! - Export as images and a multi-page PDF

pub mod cache;
pub mod chapter;
pub mod config;
pub mod detect;
pub mod error;
pub mod export;
pub mod frame;
pub mod geometry;
pub mod page;
pub mod pipeline;
pub mod preprocess;
pub mod processor;
pub mod project;
pub mod render;
pub mod translator;
pub mod util;

pub use cache::{CacheKey, CacheStats, TranslationCache};
pub use chapter::{scan_folder, Chapter, ChapterStatus};
pub use config::{AppConfig, Lang, TextColor, TranslatorConfig, TranslatorProvider};
pub use detect::{Detection, Detector, HttpDetector};
pub use error::{Error, FailureKind, Result};
pub use export::{ExportPage, ExportSummary, ExportWriter, FileExportWriter};
pub use frame::{CoordinateFrame, FitPolicy};
pub use geometry::{BoundingBox, Point, Polygon};
pub use page::{Page, ProcessingStatus, Stage, TextRegion};
pub use pipeline::{CancelHandle, ChapterPipeline, ChapterResult, PageResult};
pub use preprocess::{PreprocessOptions, PreprocessPipeline};
pub use processor::{Engines, PageContext, PageProcessor};
pub use project::ProjectStore;
pub use render::{Eraser, FontResource, StyleOverrides, TextRenderer, TextStyle};
pub use translator::{create_translator, create_with_fallback, Translator};
pub use util::clear_translation_cache;

use std::path::Path;

use image::RgbImage;
use tracing::{info, warn};

/// High-level entry point that wires configuration, cache and engines
/// together.
pub struct ComicTranslator {
    config: AppConfig,
    cache: TranslationCache,
    engines: Engines,
}

impl ComicTranslator {
    /// Create a translator with engines and cache built from configuration
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let engines = Engines::from_config(&config)?;
        let cache = TranslationCache::new(&config.cache)?;
        Ok(Self {
            config,
            cache,
            engines,
        })
    }

    /// Create with custom engines and a shared cache
    pub const fn with_engines(config: AppConfig, engines: Engines, cache: TranslationCache) -> Self {
        Self {
            config,
            cache,
            engines,
        }
    }

    /// Resume the chapter saved in `output_dir`, or start a new one from the
    /// images in `input_dir`.
    ///
    /// A saved chapter whose language pair differs from the configured one is
    /// switched to the configured pair and its translations are redone.
    pub fn open_chapter(&self, input_dir: &Path, output_dir: &Path, name: Option<&str>) -> Result<Chapter> {
        let store = ProjectStore::in_dir(output_dir);
        if store.exists() {
            let mut chapter = store.restore()?;
            info!(
                "Resuming chapter '{}' from {} ({} pages)",
                chapter.name,
                store.path().display(),
                chapter.pages.len()
            );
            let (saved_source, saved_target) = (chapter.source_lang.clone(), chapter.target_lang.clone());
            if chapter.set_languages(self.config.source_lang.clone(), self.config.target_lang.clone()) {
                warn!(
                    "Chapter '{}' was translated {} -> {}, now {} -> {}; translating again",
                    chapter.name, saved_source, saved_target, chapter.source_lang, chapter.target_lang
                );
            }
            return Ok(chapter);
        }

        let name = name.map_or_else(
            || {
                input_dir
                    .file_name()
                    .map_or_else(|| "chapter".to_string(), |n| n.to_string_lossy().into_owned())
            },
            str::to_string,
        );
        let chapter = Chapter::from_folder(
            input_dir,
            name,
            self.config.source_lang.clone(),
            self.config.target_lang.clone(),
        )?;
        info!("Loaded chapter '{}' with {} pages", chapter.name, chapter.pages.len());
        Ok(chapter)
    }

    /// Pipeline persisting to `<output_dir>/project.json`.
    pub fn pipeline(&self, output_dir: &Path) -> ChapterPipeline {
        let processor = PageProcessor::from_config(&self.config, self.engines.clone(), self.cache.clone());
        ChapterPipeline::new(processor, &self.config).with_store(ProjectStore::in_dir(output_dir))
    }

    pub fn export_writer(&self, output_dir: &Path, chapter: &Chapter) -> FileExportWriter {
        FileExportWriter::new(output_dir, &chapter.name, &self.config.export)
    }

    /// The processing-frame image of a source page, exactly as detection
    /// sees it.
    pub fn preview(&self, source: &Path) -> Result<(RgbImage, CoordinateFrame)> {
        PreprocessPipeline::new(self.config.preprocess.clone()).process_path(source)
    }

    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    pub const fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub fn translator_info(&self) -> translator::TranslatorInfo {
        self.engines.translator.info()
    }

    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.clear().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.source_lang.as_str(), "en");
        assert_eq!(config.target_lang.as_str(), "fr");
    }

    #[test]
    fn test_open_chapter_prefers_saved_project() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        image::RgbImage::new(4, 4).save(input.path().join("002.png")).unwrap();
        image::RgbImage::new(4, 4).save(input.path().join("001.png")).unwrap();

        let translator = ComicTranslator::new(AppConfig {
            cache: crate::config::CacheConfig { disk_enabled: false, ..Default::default() },
            ..Default::default()
        })
        .unwrap();

        let chapter = translator.open_chapter(input.path(), output.path(), Some("Ch 1")).unwrap();
        assert_eq!(chapter.name, "Ch 1");
        assert_eq!(chapter.pages[0].name, "001.png");

        let mut saved = chapter.clone();
        saved.pages[0].processing_status = ProcessingStatus::Detected;
        ProjectStore::in_dir(output.path()).persist(&saved).unwrap();

        let resumed = translator.open_chapter(input.path(), output.path(), None).unwrap();
        assert_eq!(resumed, saved);
    }

    #[test]
    fn test_open_chapter_adopts_new_language_pair() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        image::RgbImage::new(4, 4).save(input.path().join("001.png")).unwrap();

        let config = AppConfig {
            cache: crate::config::CacheConfig { disk_enabled: false, ..Default::default() },
            ..Default::default()
        };
        let translator = ComicTranslator::new(config.clone()).unwrap();
        let mut saved = translator.open_chapter(input.path(), output.path(), None).unwrap();
        let mut region = TextRegion::from_detection(
            0,
            Detection::new(Polygon::from_pairs(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0)]), "Hello", 0.9),
        );
        region.translated_text = Some("Bonjour".to_string());
        saved.pages[0].regions.push(region);
        saved.pages[0].processing_status = ProcessingStatus::Done;
        ProjectStore::in_dir(output.path()).persist(&saved).unwrap();

        let same = translator.open_chapter(input.path(), output.path(), None).unwrap();
        assert_eq!(same, saved);

        let german = ComicTranslator::new(AppConfig { target_lang: Lang::new("de"), ..config }).unwrap();
        let reopened = german.open_chapter(input.path(), output.path(), None).unwrap();
        assert_eq!(reopened.id, saved.id);
        assert_eq!(reopened.target_lang, Lang::new("de"));
        assert_eq!(reopened.pages[0].processing_status, ProcessingStatus::Detected);
        assert_eq!(reopened.pages[0].regions.len(), 1);
        assert!(reopened.pages[0].regions[0].translated_text.is_none());
    }
}

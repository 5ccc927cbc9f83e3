//! Integration tests for comic-translator-core
//!
//! These tests drive whole chapters through the pipeline with mock engines:
//! - Detection, translation, erasure and lettering of a page
//! - Partial failure across pages and regions
//! - Resuming from a saved project
//! - Cancellation, persistence failures and export

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use comic_translator_core::{
    config::{CacheConfig, MergeMode}, translator::TranslatorInfo, AppConfig, CancelHandle, Chapter,
    ChapterPipeline, ChapterStatus, ComicTranslator, Detection, Detector, Engines, Error,
    FitPolicy, FontResource, Lang, Page, Polygon, ProcessingStatus, ProjectStore, Result, Stage,
    TextRenderer, TextStyle, TranslationCache, Translator,
};
use comic_translator_core::render::BackgroundFillEraser;
use image::{Rgb, RgbImage};

// =============================================================================
// Mock Engines
// =============================================================================

/// What the detector returns for a page.
#[derive(Clone)]
enum Script {
    Regions(Vec<Detection>),
    Fail,
}

/// Detector keyed on the red channel of the page's top-left pixel, so each
/// test page can be given its own result.
struct ScriptedDetector {
    scripts: HashMap<u8, Script>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    fn new(scripts: impl IntoIterator<Item = (u8, Script)>) -> Arc<Self> {
        Arc::new(Self {
            scripts: scripts.into_iter().collect(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = image.get_pixel(0, 0)[0];
        match self.scripts.get(&key) {
            Some(Script::Regions(regions)) => Ok(regions.clone()),
            Some(Script::Fail) => Err(Error::DetectionRequest("mock OCR service unavailable".into())),
            None => Ok(Vec::new()),
        }
    }
}

/// A dictionary translator; unknown text fails. The first `outage` calls
/// are rate limited.
struct MockTranslator {
    dictionary: HashMap<String, String>,
    outage: usize,
    calls: AtomicUsize,
}

impl MockTranslator {
    fn new(pairs: &[(&str, &str)]) -> Arc<Self> {
        Self::with_outage(pairs, 0)
    }

    fn with_outage(pairs: &[(&str, &str)], outage: usize) -> Arc<Self> {
        Arc::new(Self {
            dictionary: pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
            outage,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for MockTranslator {
    fn info(&self) -> TranslatorInfo {
        TranslatorInfo {
            name: "mock",
            requires_api_key: false,
            supports_auto_detect: false,
        }
    }

    async fn translate(&self, text: &str, _source: &Lang, _target: &Lang) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.outage {
            return Err(Error::TranslationRateLimited { retry_after: Some(1) });
        }
        // Give concurrent callers a chance to pile up on the same key.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        self.dictionary
            .get(text)
            .cloned()
            .ok_or_else(|| Error::TranslationRequest(format!("no translation for {text:?}")))
    }
}

/// One recorded `draw_text` call.
#[derive(Debug, Clone)]
struct DrawCall {
    polygon: Polygon,
    text: String,
    style: TextStyle,
}

/// Records what it was asked to draw without touching pixels.
#[derive(Default)]
struct RecordingRenderer {
    calls: Mutex<Vec<DrawCall>>,
}

impl RecordingRenderer {
    fn drawn(&self) -> Vec<DrawCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl TextRenderer for RecordingRenderer {
    fn draw_text(
        &self,
        _image: &mut RgbImage,
        polygon: &Polygon,
        text: &str,
        _font: Option<&FontResource>,
        style: &TextStyle,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(DrawCall {
            polygon: polygon.clone(),
            text: text.to_string(),
            style: *style,
        });
        Ok(())
    }
}

// =============================================================================
// Test Fixtures
// =============================================================================

struct Harness {
    detector: Arc<ScriptedDetector>,
    translator: Arc<MockTranslator>,
    renderer: Arc<RecordingRenderer>,
    cache: TranslationCache,
    config: AppConfig,
    input: tempfile::TempDir,
    output: tempfile::TempDir,
}

impl Harness {
    fn new(detector: Arc<ScriptedDetector>, translator: Arc<MockTranslator>) -> Self {
        Self {
            detector,
            translator,
            renderer: Arc::new(RecordingRenderer::default()),
            cache: TranslationCache::in_memory(),
            config: create_test_config(),
            input: tempfile::tempdir().unwrap(),
            output: tempfile::tempdir().unwrap(),
        }
    }

    fn engines(&self) -> Engines {
        Engines {
            detector: self.detector.clone(),
            translator: self.translator.clone(),
            eraser: Arc::new(BackgroundFillEraser::default()),
            renderer: self.renderer.clone(),
        }
    }

    fn translator(&self) -> ComicTranslator {
        ComicTranslator::with_engines(self.config.clone(), self.engines(), self.cache.clone())
    }

    fn pipeline(&self) -> ChapterPipeline {
        self.translator().pipeline(self.output.path())
    }

    fn chapter(&self) -> Chapter {
        self.translator()
            .open_chapter(self.input.path(), self.output.path(), Some("Chapter 1"))
            .unwrap()
    }

    fn store(&self) -> ProjectStore {
        ProjectStore::in_dir(self.output.path())
    }
}

/// Create a minimal test configuration
fn create_test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.preprocess.fit = FitPolicy::identity();
    config.detection.merge = MergeMode::Off;
    config.cache = CacheConfig {
        disk_enabled: false,
        ..Default::default()
    };
    config
}

/// A white 200x100 page whose top-left corner identifies it to the detector,
/// with a dark stroke where the original lettering would be.
fn write_page(dir: &Path, name: &str, key: u8) -> PathBuf {
    let mut image = RgbImage::from_pixel(200, 100, Rgb([255, 255, 255]));
    // A block rather than one pixel so the key survives downscaling.
    for y in 0..8 {
        for x in 0..8 {
            image.put_pixel(x, y, Rgb([key, 255, 255]));
        }
    }
    for x in 20..90 {
        image.put_pixel(x, 25, Rgb([0, 0, 0]));
        image.put_pixel(x, 26, Rgb([0, 0, 0]));
    }
    let path = dir.join(name);
    image.save(&path).unwrap();
    path
}

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon {
    Polygon::from_pairs(&[(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
}

fn hello_region() -> Detection {
    Detection::new(rect(10.0, 10.0, 100.0, 40.0), "Hello", 0.95)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_single_region_is_translated_erased_and_lettered() {
    let h = Harness::new(
        ScriptedDetector::new([(1, Script::Regions(vec![hello_region()]))]),
        MockTranslator::new(&[("Hello", "Bonjour")]),
    );
    write_page(h.input.path(), "001.png", 1);
    let mut chapter = h.chapter();

    let result = h.pipeline().run(&mut chapter).await;

    assert_eq!(result.status, ChapterStatus::Complete);
    let page = &chapter.pages[0];
    assert_eq!(page.processing_status, ProcessingStatus::Done);
    assert_eq!(page.regions[0].translated_text.as_deref(), Some("Bonjour"));

    let cached = h.cache.lookup("Hello", &Lang::new("en"), &Lang::new("fr")).await;
    assert_eq!(cached.as_deref(), Some("Bonjour"));

    let erased = image::open(page.erased_image_ref.as_ref().unwrap()).unwrap().to_rgb8();
    assert_eq!(*erased.get_pixel(50, 25), Rgb([255, 255, 255]));

    let drawn = h.renderer.drawn();
    assert_eq!(drawn.len(), 1);
    assert_eq!(drawn[0].text, "Bonjour");
    assert_eq!(drawn[0].polygon, rect(10.0, 10.0, 100.0, 40.0));
    assert_eq!(drawn[0].style.margins, h.config.render.margins);
}

#[tokio::test]
async fn test_zero_region_page_is_done_and_unchanged() {
    let h = Harness::new(ScriptedDetector::new([]), MockTranslator::new(&[]));
    let source = write_page(h.input.path(), "001.png", 7);
    let mut chapter = h.chapter();

    h.pipeline().run(&mut chapter).await;

    let page = &chapter.pages[0];
    assert_eq!(page.processing_status, ProcessingStatus::Done);
    assert!(page.regions.is_empty());
    let (frame_image, _) = h.translator().preview(&source).unwrap();
    let rendered = image::open(page.rendered_image_ref.as_ref().unwrap()).unwrap().to_rgb8();
    assert_eq!(rendered.as_raw(), frame_image.as_raw());
}

#[tokio::test]
async fn test_detection_failure_leaves_chapter_partially_complete() {
    let h = Harness::new(
        ScriptedDetector::new([
            (1, Script::Regions(vec![hello_region()])),
            (2, Script::Fail),
            (3, Script::Regions(vec![hello_region()])),
        ]),
        MockTranslator::new(&[("Hello", "Bonjour")]),
    );
    write_page(h.input.path(), "001.png", 1);
    write_page(h.input.path(), "002.png", 2);
    write_page(h.input.path(), "003.png", 3);
    let mut chapter = h.chapter();
    let pipeline = h.pipeline();

    let result = pipeline.run(&mut chapter).await;

    assert_eq!(result.status, ChapterStatus::PartiallyComplete);
    assert_eq!(result.failed_pages, vec![1]);
    assert!(matches!(
        chapter.pages[1].processing_status,
        ProcessingStatus::Errored { stage: Stage::Detection, .. }
    ));
    assert!(result.to_string().contains("errored at detection"));

    let writer = h.translator().export_writer(h.output.path(), &chapter);
    let summary = pipeline.export(&chapter, &writer).unwrap();
    assert_eq!(summary.images.len(), 2);
    assert_eq!(summary.skipped_pages, vec![1]);
    assert!(summary.images[0].ends_with("001_translated.png"));
    assert!(summary.document.unwrap().ends_with("Chapter 1.pdf"));
}

#[tokio::test]
async fn test_malformed_geometry_errors_page_and_chapter_continues() {
    let outside = Detection::new(rect(150.0, 10.0, 260.0, 40.0), "Hello", 0.9);
    let h = Harness::new(
        ScriptedDetector::new([
            (1, Script::Regions(vec![outside])),
            (2, Script::Regions(vec![hello_region()])),
        ]),
        MockTranslator::new(&[("Hello", "Bonjour")]),
    );
    write_page(h.input.path(), "001.png", 1);
    write_page(h.input.path(), "002.png", 2);
    let mut chapter = h.chapter();

    let result = h.pipeline().run(&mut chapter).await;

    assert!(matches!(
        chapter.pages[0].processing_status,
        ProcessingStatus::Errored { stage: Stage::Detection, .. }
    ));
    assert_eq!(chapter.pages[1].processing_status, ProcessingStatus::Done);
    assert_eq!(result.failed_pages, vec![0]);
}

#[tokio::test]
async fn test_region_translation_failure_keeps_siblings() {
    let h = Harness::new(
        ScriptedDetector::new([(
            1,
            Script::Regions(vec![
                hello_region(),
                Detection::new(rect(10.0, 50.0, 100.0, 90.0), "Gibberish", 0.9),
            ]),
        )]),
        MockTranslator::new(&[("Hello", "Bonjour")]),
    );
    write_page(h.input.path(), "001.png", 1);
    let mut chapter = h.chapter();

    let result = h.pipeline().run(&mut chapter).await;

    let page = &chapter.pages[0];
    assert_eq!(page.processing_status, ProcessingStatus::Done);
    assert_eq!(page.regions[0].translated_text.as_deref(), Some("Bonjour"));
    assert!(page.regions[1].translated_text.is_none());
    assert_eq!(page.regions[1].ocr_text, "Gibberish");
    assert!(page.regions[1].translation_error.is_some());
    assert_eq!(result.pages[0].region_errors.len(), 1);
    assert_eq!(h.renderer.drawn().len(), 1);
}

#[tokio::test]
async fn test_rate_limited_region_is_retried_on_next_run() {
    let h = Harness::new(
        ScriptedDetector::new([(1, Script::Regions(vec![hello_region()]))]),
        MockTranslator::with_outage(&[("Hello", "Bonjour")], 1),
    );
    write_page(h.input.path(), "001.png", 1);
    let mut chapter = h.chapter();
    let pipeline = h.pipeline();

    pipeline.run(&mut chapter).await;
    let region = &chapter.pages[0].regions[0];
    assert!(region.translated_text.is_none());
    assert!(region.translation_error.is_some());
    assert!(h.renderer.drawn().is_empty());

    let result = pipeline.run(&mut chapter).await;

    assert_eq!(result.status, ChapterStatus::Complete);
    let page = &chapter.pages[0];
    assert_eq!(page.processing_status, ProcessingStatus::Done);
    assert_eq!(page.regions[0].translated_text.as_deref(), Some("Bonjour"));
    assert!(page.regions[0].translation_error.is_none());
    assert_eq!(h.renderer.drawn().last().unwrap().text, "Bonjour");
    assert_eq!((h.detector.calls(), h.translator.calls()), (1, 2));

    // Nothing left to retry.
    pipeline.run(&mut chapter).await;
    assert_eq!(h.translator.calls(), 2);
}

#[tokio::test]
async fn test_resume_from_saved_project_skips_detection_and_translation() {
    let h = Harness::new(
        ScriptedDetector::new([(1, Script::Regions(vec![hello_region()]))]),
        MockTranslator::new(&[("Hello", "Bonjour")]),
    );
    write_page(h.input.path(), "001.png", 1);
    let mut chapter = h.chapter();
    h.pipeline().run(&mut chapter).await;
    assert_eq!((h.detector.calls(), h.translator.calls()), (1, 1));

    // Pretend the run stopped right after translation.
    let mut saved = h.store().restore().unwrap();
    saved.pages[0].processing_status = ProcessingStatus::Translated;
    saved.pages[0].erased_image_ref = None;
    saved.pages[0].rendered_image_ref = None;
    h.store().persist(&saved).unwrap();

    let mut resumed = h.chapter();
    assert_eq!(resumed.pages[0].processing_status, ProcessingStatus::Translated);
    let result = h.pipeline().run(&mut resumed).await;

    assert_eq!(result.status, ChapterStatus::Complete);
    assert_eq!(resumed.pages[0].processing_status, ProcessingStatus::Done);
    assert_eq!((h.detector.calls(), h.translator.calls()), (1, 1));
    assert_eq!(h.renderer.drawn().len(), 2);
}

#[tokio::test]
async fn test_project_file_tracks_run() {
    let h = Harness::new(
        ScriptedDetector::new([(1, Script::Regions(vec![hello_region()]))]),
        MockTranslator::new(&[("Hello", "Bonjour")]),
    );
    write_page(h.input.path(), "001.png", 1);
    let mut chapter = h.chapter();

    let result = h.pipeline().run(&mut chapter).await;

    assert!(result.saved);
    assert!(result.persistence_errors.is_empty());
    assert_eq!(h.store().restore().unwrap(), chapter);
}

#[tokio::test]
async fn test_persistence_failure_is_reported_and_state_kept() {
    let h = Harness::new(
        ScriptedDetector::new([(1, Script::Regions(vec![hello_region()]))]),
        MockTranslator::new(&[("Hello", "Bonjour")]),
    );
    write_page(h.input.path(), "001.png", 1);
    let mut chapter = h.chapter();

    // The project directory is a regular file, so nothing can be written.
    let blocker = h.output.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let processor = h.pipeline().processor().clone();
    let pipeline = ChapterPipeline::new(processor, &h.config)
        .with_store(ProjectStore::in_dir(&blocker))
        .with_work_dir(h.output.path().join("work"));

    let result = pipeline.run(&mut chapter).await;

    assert!(!result.saved);
    assert!(!result.persistence_errors.is_empty());
    assert_eq!(chapter.pages[0].processing_status, ProcessingStatus::Done);
    assert_eq!(chapter.pages[0].regions[0].translated_text.as_deref(), Some("Bonjour"));
}

#[tokio::test]
async fn test_changed_preprocessing_invalidates_regions() {
    let h = Harness::new(
        ScriptedDetector::new([(1, Script::Regions(vec![hello_region()]))]),
        MockTranslator::new(&[("Hello", "Bonjour")]),
    );
    write_page(h.input.path(), "001.png", 1);
    let mut chapter = h.chapter();
    h.pipeline().run(&mut chapter).await;

    let mut narrow = h.config.clone();
    narrow.preprocess.fit = FitPolicy::max_width(100);
    let translator = ComicTranslator::with_engines(narrow, h.engines(), h.cache.clone());
    translator.pipeline(h.output.path()).run(&mut chapter).await;

    assert_eq!(h.detector.calls(), 2);
    let page = &chapter.pages[0];
    assert_eq!(page.coordinate_frame.unwrap().frame_dims(), (100, 50));
    assert_eq!(page.processing_status, ProcessingStatus::Done);
    assert_eq!(page.regions.len(), 1);
    assert_eq!(page.regions[0].translated_text.as_deref(), Some("Bonjour"));
    // Re-detected text is already cached.
    assert_eq!(h.translator.calls(), 1);
}

#[tokio::test]
async fn test_cancel_before_start_schedules_nothing() {
    let h = Harness::new(
        ScriptedDetector::new([(1, Script::Regions(vec![hello_region()]))]),
        MockTranslator::new(&[("Hello", "Bonjour")]),
    );
    write_page(h.input.path(), "001.png", 1);
    write_page(h.input.path(), "002.png", 1);
    let mut chapter = h.chapter();
    let cancel = CancelHandle::new();
    cancel.cancel();

    let result = h.pipeline().run_with(&mut chapter, &cancel, None).await;

    assert!(result.cancelled);
    assert_eq!(result.status, ChapterStatus::Pending);
    assert_eq!(h.detector.calls(), 0);
    assert!(chapter.pages.iter().all(|p| p.processing_status == ProcessingStatus::Pending));
}

#[tokio::test]
async fn test_same_text_across_pages_is_translated_once() {
    let h = Harness::new(
        ScriptedDetector::new([(1, Script::Regions(vec![hello_region()]))]),
        MockTranslator::new(&[("Hello", "Bonjour")]),
    );
    for name in ["001.png", "002.png", "003.png", "004.png"] {
        write_page(h.input.path(), name, 1);
    }
    let mut chapter = h.chapter();
    let progress = Mutex::new(Vec::new());
    let record = |done: usize, total: usize| progress.lock().unwrap().push((done, total));

    let result = h.pipeline().run_with(&mut chapter, &CancelHandle::new(), Some(&record)).await;

    assert_eq!(result.status, ChapterStatus::Complete);
    assert_eq!(h.translator.calls(), 1);
    assert_eq!(result.cache_hits + result.cache_misses, 4);
    assert_eq!(result.cache_misses, 1);
    assert_eq!(progress.lock().unwrap().last(), Some(&(4, 4)));
}

#[tokio::test]
async fn test_rerender_redraws_without_detection_or_translation() {
    let h = Harness::new(
        ScriptedDetector::new([(1, Script::Regions(vec![hello_region()]))]),
        MockTranslator::new(&[("Hello", "Bonjour")]),
    );
    write_page(h.input.path(), "001.png", 1);
    let mut chapter = h.chapter();
    let pipeline = h.pipeline();
    pipeline.run(&mut chapter).await;

    chapter.font_selection = Some(PathBuf::from("/nonexistent/font.ttf"));
    assert_eq!(pipeline.rerender(&mut chapter), 1);
    assert_eq!(chapter.pages[0].processing_status, ProcessingStatus::Erased);
    pipeline.run(&mut chapter).await;

    assert_eq!(chapter.pages[0].processing_status, ProcessingStatus::Done);
    assert_eq!((h.detector.calls(), h.translator.calls()), (1, 1));
    assert_eq!(h.renderer.drawn().len(), 2);
}

#[tokio::test]
async fn test_edited_translation_is_drawn_on_next_run() {
    let h = Harness::new(
        ScriptedDetector::new([(1, Script::Regions(vec![hello_region()]))]),
        MockTranslator::new(&[("Hello", "Bonjour")]),
    );
    write_page(h.input.path(), "001.png", 1);
    let mut chapter = h.chapter();
    let pipeline = h.pipeline();
    pipeline.run(&mut chapter).await;

    assert!(chapter.pages[0].edit_translation(0, "Salut !"));
    pipeline.run(&mut chapter).await;

    let drawn = h.renderer.drawn();
    assert_eq!(drawn.last().unwrap().text, "Salut !");
    assert_eq!(h.translator.calls(), 1);
}

#[test]
fn test_page_names_follow_folder_order() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.PNG", "A.jpg", "c.txt", "C.webp"] {
        std::fs::write(dir.path().join(name), b"").unwrap();
    }
    let chapter = Chapter::from_folder(dir.path(), "x", Lang::new("en"), Lang::new("fr")).unwrap();
    let names: Vec<&str> = chapter.pages.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["A.jpg", "b.PNG", "C.webp"]);
    assert!(chapter.pages.iter().map(|p: &Page| p.index).eq(0..3));
}

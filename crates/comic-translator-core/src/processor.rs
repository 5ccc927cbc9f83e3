//! Per-page state machine.
//!
//! A page moves through `Pending → Detected → Translated → Erased → Rendered
//! → Done`. Each call to [`PageProcessor::process`] starts from whatever the
//! page's stored status says has already been done, so a reloaded project
//! never repeats detection or translation for a page that got past them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::cache::TranslationCache;
use crate::chapter::Chapter;
use crate::config::{AppConfig, ExportImageFormat, Lang, RenderConfig};
use crate::detect::{detect_regions, DetectionOptions, Detector, HttpDetector};
use crate::error::{Error, Result};
use crate::export::encode_rgb;
use crate::frame::CoordinateFrame;
use crate::geometry::Polygon;
use crate::page::{Page, ProcessingStatus, Stage, TextRegion};
use crate::pipeline::CancelHandle;
use crate::preprocess::{load_image, PreprocessPipeline};
use crate::render::{BackgroundFillEraser, Eraser, FontResource, OutlineRenderer, TextRenderer, TextStyle};
use crate::translator::{create_with_fallback, Translator};
use crate::util::{truncate_for_log, write_atomic};

/// Callback receiving a copy of the page after every status change.
pub type SnapshotFn<'a> = &'a (dyn Fn(&Page) + Send + Sync);

/// The pluggable capabilities a page run needs.
#[derive(Clone)]
pub struct Engines {
    pub detector: Arc<dyn Detector>,
    pub translator: Arc<dyn Translator>,
    pub eraser: Arc<dyn Eraser>,
    pub renderer: Arc<dyn TextRenderer>,
}

impl Engines {
    /// HTTP detector, configured translator (with optional fallback),
    /// background-fill eraser and outline renderer.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            detector: Arc::new(HttpDetector::new(&config.detection)?),
            translator: create_with_fallback(&config.translator, config.fallback.as_ref())?,
            eraser: Arc::new(BackgroundFillEraser::new(config.render.erase_padding)),
            renderer: Arc::new(OutlineRenderer),
        })
    }
}

/// Chapter-wide inputs shared by every page of one run.
#[derive(Debug, Clone)]
pub struct PageContext {
    pub source_lang: Lang,
    pub target_lang: Lang,
    pub font: Option<FontResource>,
    pub style: TextStyle,
    /// Where erased and rendered artifacts are written
    pub work_dir: PathBuf,
}

impl PageContext {
    /// Context for `chapter`, resolving its font selection (or the configured
    /// font) with system fallback.
    pub fn for_chapter(chapter: &Chapter, render: &RenderConfig, work_dir: PathBuf) -> Self {
        let selection = chapter
            .font_selection
            .as_deref()
            .or(render.font_path.as_deref());
        Self {
            source_lang: chapter.source_lang.clone(),
            target_lang: chapter.target_lang.clone(),
            font: FontResource::resolve(selection),
            style: TextStyle::from_config(render),
            work_dir,
        }
    }

    fn artifact_path(&self, index: usize, kind: &str) -> PathBuf {
        self.work_dir.join(format!("page_{index:03}_{kind}.png"))
    }
}

/// Images produced earlier in the same run, kept to avoid reloading them.
#[derive(Default)]
struct Scratch {
    frame_image: Option<RgbImage>,
    erased_image: Option<RgbImage>,
}

/// Drives one page at a time through the processing stages.
#[derive(Clone)]
pub struct PageProcessor {
    engines: Engines,
    cache: TranslationCache,
    preprocess: PreprocessPipeline,
    detection: DetectionOptions,
    translate_concurrency: usize,
}

impl PageProcessor {
    pub fn new(
        engines: Engines,
        cache: TranslationCache,
        preprocess: PreprocessPipeline,
        detection: DetectionOptions,
        translate_concurrency: usize,
    ) -> Self {
        Self {
            engines,
            cache,
            preprocess,
            detection,
            translate_concurrency: translate_concurrency.max(1),
        }
    }

    pub fn from_config(config: &AppConfig, engines: Engines, cache: TranslationCache) -> Self {
        Self::new(
            engines,
            cache,
            PreprocessPipeline::new(config.preprocess.clone()),
            DetectionOptions::from(&config.detection),
            config.pipeline.translate_concurrency,
        )
    }

    pub const fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub const fn preprocess(&self) -> &PreprocessPipeline {
        &self.preprocess
    }

    /// Advance `page` as far as it can go.
    ///
    /// Stage failures are recorded on the page as `Errored` and returned.
    /// [`Error::Cancelled`] means the page stopped after its last completed
    /// stage.
    pub async fn process(
        &self,
        page: &mut Page,
        ctx: &PageContext,
        cancel: &CancelHandle,
        on_snapshot: SnapshotFn<'_>,
    ) -> Result<()> {
        if let ProcessingStatus::Errored { stage, message } = &page.processing_status {
            let stage = *stage;
            info!("Page {} resuming {} after earlier failure: {}", page.index, stage, message);
            page.processing_status = stage.resume_status();
        }

        if let Err(e) = self.validate_frame(page, on_snapshot) {
            let Some(stage) = page.processing_status.next_stage() else {
                warn!("Page {}: cannot check source image ({}), keeping finished page", page.index, e);
                return Ok(());
            };
            return Err(fail(page, stage, e, on_snapshot));
        }

        if page.retry_failed_translations() {
            info!("Page {}: retrying regions whose translation failed", page.index);
        }

        let mut scratch = Scratch::default();
        while let Some(stage) = page.processing_status.next_stage() {
            if cancel.is_cancelled() {
                debug!("Page {} cancelled before {}", page.index, stage);
                return Err(Error::Cancelled);
            }

            let result = match stage {
                Stage::Detection => self.run_detection(page, &mut scratch).await,
                Stage::Translation => {
                    self.run_translation(page, ctx).await;
                    Ok(())
                }
                Stage::Erasure => self.run_erasure(page, ctx, &mut scratch).await,
                Stage::Render => self.run_render(page, ctx, &mut scratch).await,
                Stage::Finalize => finalize(page).await,
            };

            match result {
                Ok(()) => {
                    page.processing_status = stage.completed_status();
                    debug!("Page {} -> {}", page.index, page.processing_status);
                    on_snapshot(page);
                }
                Err(e) => return Err(fail(page, stage, e, on_snapshot)),
            }
        }

        info!("Page {} done ({} regions)", page.index, page.regions.len());
        Ok(())
    }

    /// Recompute the frame from the source header; a frame that no longer
    /// matches drops everything derived from it.
    fn validate_frame(&self, page: &mut Page, on_snapshot: SnapshotFn<'_>) -> Result<()> {
        let current = self.preprocess.frame_for_path(&page.source_image_ref)?;
        let stale = match &page.coordinate_frame {
            Some(stored) => !stored.matches(&current),
            None => page.processing_status != ProcessingStatus::Pending,
        };
        if stale {
            warn!(
                "Page {}: processing frame changed, discarding {} regions",
                page.index,
                page.regions.len()
            );
            page.invalidate();
            on_snapshot(page);
        }
        Ok(())
    }

    async fn run_detection(&self, page: &mut Page, scratch: &mut Scratch) -> Result<()> {
        let (image, frame) = self.frame_image(&page.source_image_ref).await?;
        let detections =
            detect_regions(self.engines.detector.as_ref(), &image, &frame, &self.detection).await?;

        info!(
            "Page {}: {} found {} regions",
            page.index,
            self.engines.detector.name(),
            detections.len()
        );

        page.coordinate_frame = Some(frame);
        page.regions = (0..)
            .zip(detections)
            .map(|(id, detection)| TextRegion::from_detection(id, detection))
            .collect();
        page.erased_image_ref = None;
        page.rendered_image_ref = None;
        scratch.frame_image = Some(image);
        Ok(())
    }

    /// Translate every region that has no translation yet. Failures stay on
    /// their region.
    async fn run_translation(&self, page: &mut Page, ctx: &PageContext) {
        let jobs: Vec<(usize, String)> = page
            .regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.translated_text.is_none() && !r.ocr_text.trim().is_empty())
            .map(|(i, r)| (i, r.ocr_text.clone()))
            .collect();

        if jobs.is_empty() {
            return;
        }

        debug!("Page {}: translating {} regions", page.index, jobs.len());

        let results: Vec<(usize, Result<String>)> = stream::iter(jobs)
            .map(|(i, text)| async move {
                let result = self
                    .cache
                    .translate_with(&self.engines.translator, &text, &ctx.source_lang, &ctx.target_lang)
                    .await;
                (i, result)
            })
            .buffered(self.translate_concurrency)
            .collect()
            .await;

        for (i, result) in results {
            let region = &mut page.regions[i];
            match result {
                Ok(text) => {
                    region.translated_text = Some(text);
                    region.translation_error = None;
                }
                Err(e) => {
                    warn!(
                        "Page {} region {}: translation of \"{}\" failed: {}",
                        page.index,
                        region.id,
                        truncate_for_log(&region.ocr_text, 40),
                        e
                    );
                    region.translation_error = Some(e.to_string());
                }
            }
        }
    }

    async fn run_erasure(&self, page: &mut Page, ctx: &PageContext, scratch: &mut Scratch) -> Result<()> {
        let image = match scratch.frame_image.take() {
            Some(image) => image,
            None => self.frame_image_checked(page).await?,
        };
        let path = ctx.artifact_path(page.index, "erased");
        let erased = self.erase_and_save(image, page, path.clone()).await?;

        page.erased_image_ref = Some(path);
        scratch.erased_image = Some(erased);
        Ok(())
    }

    async fn run_render(&self, page: &mut Page, ctx: &PageContext, scratch: &mut Scratch) -> Result<()> {
        let base = match scratch.erased_image.take() {
            Some(image) => image,
            None => self.load_erased(page, ctx).await?,
        };

        let jobs: Vec<(usize, Polygon, String, TextStyle)> = page
            .regions
            .iter()
            .enumerate()
            .filter_map(|(i, r)| {
                let text = r.translated_text.as_deref().filter(|t| !t.trim().is_empty())?;
                Some((i, r.polygon.clone(), text.to_string(), ctx.style.with_overrides(&r.style_overrides)))
            })
            .collect();

        let renderer = Arc::clone(&self.engines.renderer);
        let font = ctx.font.clone();
        let path = ctx.artifact_path(page.index, "rendered");
        let out = path.clone();

        let failures = blocking(move || {
            let mut image = base;
            let mut failures = Vec::new();
            for (i, polygon, text, style) in &jobs {
                if let Err(e) = renderer.draw_text(&mut image, polygon, text, font.as_ref(), style) {
                    failures.push((*i, e.to_string()));
                }
            }
            save_png(&image, &out)?;
            Ok(failures)
        })
        .await?;

        for region in &mut page.regions {
            region.render_error = None;
        }
        for (i, message) in failures {
            let region = &mut page.regions[i];
            warn!("Page {} region {}: left erased, {}", page.index, region.id, message);
            region.render_error = Some(message);
        }

        page.rendered_image_ref = Some(path);
        Ok(())
    }

    /// The erased artifact, or a fresh erasure of the frame image when the
    /// artifact is gone or no longer fits the frame.
    async fn load_erased(&self, page: &mut Page, ctx: &PageContext) -> Result<RgbImage> {
        let expected = page.coordinate_frame.map(|f| f.frame_dims());
        if let Some(path) = page.erased_image_ref.clone().filter(|p| p.exists()) {
            let loaded = blocking(move || Ok(load_image(&path)?.to_rgb8())).await;
            match loaded {
                Ok(image) if Some(image.dimensions()) == expected => return Ok(image),
                Ok(image) => warn!(
                    "Page {}: erased artifact is {:?}, expected {:?}; erasing again",
                    page.index,
                    image.dimensions(),
                    expected
                ),
                Err(e) => warn!("Page {}: erased artifact unreadable ({}); erasing again", page.index, e),
            }
        }

        debug!("Page {}: recomputing erased image from the frame image", page.index);
        let image = self.frame_image_checked(page).await?;
        let path = ctx.artifact_path(page.index, "erased");
        let erased = self.erase_and_save(image, page, path.clone()).await?;
        page.erased_image_ref = Some(path);
        Ok(erased)
    }

    async fn erase_and_save(&self, image: RgbImage, page: &Page, path: PathBuf) -> Result<RgbImage> {
        let polygons: Vec<Polygon> = page.regions.iter().map(|r| r.polygon.clone()).collect();
        let eraser = Arc::clone(&self.engines.eraser);
        blocking(move || {
            let mut image = image;
            for polygon in &polygons {
                eraser.erase(&mut image, polygon)?;
            }
            save_png(&image, &path)?;
            Ok(image)
        })
        .await
    }

    async fn frame_image(&self, source: &Path) -> Result<(RgbImage, CoordinateFrame)> {
        let preprocess = self.preprocess.clone();
        let source = source.to_path_buf();
        blocking(move || preprocess.process_path(&source)).await
    }

    /// Frame image for a page that already has regions; the regenerated frame
    /// must agree with the stored one.
    async fn frame_image_checked(&self, page: &Page) -> Result<RgbImage> {
        let (image, frame) = self.frame_image(&page.source_image_ref).await?;
        match page.coordinate_frame {
            Some(stored) if stored.matches(&frame) => Ok(image),
            _ => Err(Error::InvalidImage(format!(
                "page {} frame image does not match its stored coordinate frame",
                page.index
            ))),
        }
    }
}

/// The rendered artifact must exist and have exactly the frame dimensions.
async fn finalize(page: &Page) -> Result<()> {
    let frame = page
        .coordinate_frame
        .ok_or_else(|| Error::InvalidImage(format!("page {} has no coordinate frame", page.index)))?;
    let path = page
        .rendered_image_ref
        .clone()
        .ok_or_else(|| Error::ResourceMissing(format!("rendered image for page {}", page.index)))?;

    let dims = blocking(move || {
        image::image_dimensions(&path).map_err(|e| Error::ImageRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    })
    .await?;

    if dims != frame.frame_dims() {
        return Err(Error::InvalidImage(format!(
            "rendered image is {}x{}, frame is {}x{}",
            dims.0, dims.1, frame.frame_width, frame.frame_height
        )));
    }
    Ok(())
}

fn fail(page: &mut Page, stage: Stage, error: Error, on_snapshot: SnapshotFn<'_>) -> Error {
    warn!("Page {} failed at {}: {}", page.index, stage, error);
    page.processing_status = ProcessingStatus::Errored {
        stage,
        message: error.to_string(),
    };
    on_snapshot(page);
    error
}

/// Run CPU-bound work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Worker(e.to_string()))?
}

/// Encode as PNG and replace `path` atomically.
fn save_png(image: &RgbImage, path: &Path) -> Result<()> {
    let bytes = encode_rgb(image, ExportImageFormat::Png, 0, path)?;
    write_atomic(path, &bytes)
}

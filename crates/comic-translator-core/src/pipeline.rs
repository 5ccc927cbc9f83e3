//! Chapter-level scheduling, persistence and export.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chapter::{Chapter, ChapterStatus};
use crate::config::{AppConfig, RenderConfig};
use crate::error::{Error, Result};
use crate::export::{ExportPage, ExportSummary, ExportWriter};
use crate::page::{Page, ProcessingStatus};
use crate::processor::{PageContext, PageProcessor};
use crate::project::ProjectStore;

/// Cooperative cancellation shared between a run and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress callback: `(finished_pages, total_pages)`.
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// Outcome of one page in a run.
#[derive(Debug, Clone)]
pub struct PageResult {
    pub index: usize,
    pub name: String,
    pub status: ProcessingStatus,
    pub regions: usize,
    pub translated: usize,
    /// `(region id, message)` for regions that failed translation or lettering
    pub region_errors: Vec<(u32, String)>,
}

impl PageResult {
    fn from_page(page: &Page) -> Self {
        let region_errors = page
            .regions
            .iter()
            .filter_map(|r| {
                r.translation_error
                    .as_ref()
                    .or(r.render_error.as_ref())
                    .map(|e| (r.id, e.clone()))
            })
            .collect();
        Self {
            index: page.index,
            name: page.name.clone(),
            status: page.processing_status.clone(),
            regions: page.regions.len(),
            translated: page.regions.iter().filter(|r| r.is_translated()).count(),
            region_errors,
        }
    }
}

/// Outcome of a chapter run.
#[derive(Debug, Clone)]
pub struct ChapterResult {
    pub chapter_id: Uuid,
    pub status: ChapterStatus,
    pub pages: Vec<PageResult>,
    /// Indices of pages that ended the run errored
    pub failed_pages: Vec<usize>,
    pub cancelled: bool,
    /// Whether the final chapter state reached the project file
    pub saved: bool,
    pub persistence_errors: Vec<String>,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl fmt::Display for ChapterResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Chapter {}: {}", self.chapter_id, self.status)?;
        for page in &self.pages {
            writeln!(
                f,
                "  [{:03}] {}: {} ({}/{} regions translated)",
                page.index, page.name, page.status, page.translated, page.regions
            )?;
            for (id, message) in &page.region_errors {
                writeln!(f, "        region {id}: {message}")?;
            }
        }
        write!(
            f,
            "Cache: {} hits, {} misses",
            self.cache_hits, self.cache_misses
        )?;
        if self.cancelled {
            write!(f, "\nRun was cancelled")?;
        }
        if !self.persistence_errors.is_empty() {
            write!(f, "\nProject not saved: {}", self.persistence_errors.join("; "))?;
        }
        Ok(())
    }
}

/// Runs every page of a chapter through a [`PageProcessor`].
pub struct ChapterPipeline {
    processor: PageProcessor,
    render: RenderConfig,
    concurrency: usize,
    work_dir: Option<PathBuf>,
    store: Option<ProjectStore>,
    export_document: bool,
}

impl ChapterPipeline {
    pub fn new(processor: PageProcessor, config: &AppConfig) -> Self {
        Self {
            processor,
            render: config.render.clone(),
            concurrency: config.pipeline.concurrency.max(1),
            work_dir: config.pipeline.work_dir.clone(),
            store: None,
            export_document: config.export.create_pdf,
        }
    }

    /// Persist the chapter through `store` after every stage.
    #[must_use]
    pub fn with_store(mut self, store: ProjectStore) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub const fn processor(&self) -> &PageProcessor {
        &self.processor
    }

    pub const fn store(&self) -> Option<&ProjectStore> {
        self.store.as_ref()
    }

    /// Artifact directory: configured, next to the project file, or a
    /// per-chapter temp directory.
    fn work_dir_for(&self, chapter: &Chapter) -> PathBuf {
        if let Some(dir) = &self.work_dir {
            return dir.clone();
        }
        match self.store.as_ref().and_then(|s| s.path().parent()) {
            Some(parent) => parent.join(".work"),
            None => std::env::temp_dir()
                .join(crate::util::APP_DIR_NAME)
                .join(chapter.id.to_string()),
        }
    }

    pub async fn run(&self, chapter: &mut Chapter) -> ChapterResult {
        self.run_with(chapter, &CancelHandle::new(), None).await
    }

    /// Process every page that is not done yet.
    pub async fn run_with(
        &self,
        chapter: &mut Chapter,
        cancel: &CancelHandle,
        progress: Option<ProgressFn<'_>>,
    ) -> ChapterResult {
        let stats_before = self.processor.cache().stats();
        let ctx = PageContext::for_chapter(chapter, &self.render, self.work_dir_for(chapter));
        let total = chapter.pages.len();
        info!(
            "Processing chapter '{}' ({} pages, {} -> {})",
            chapter.name, total, chapter.source_lang, chapter.target_lang
        );

        let (tx, rx) = mpsc::unbounded_channel::<(usize, Page)>();
        let writer: Option<JoinHandle<Vec<String>>> = self
            .store
            .clone()
            .map(|store| tokio::spawn(write_snapshots(store, chapter.clone(), rx)));

        let finished = AtomicUsize::new(0);
        {
            let ctx = &ctx;
            let finished = &finished;
            let tx = &tx;
            stream::iter(chapter.pages.iter_mut().enumerate())
                .map(|(position, page)| async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let on_snapshot = |snapshot: &Page| {
                        // Receiver gone means there is no store to write to.
                        let _ = tx.send((position, snapshot.clone()));
                    };
                    match self.processor.process(page, ctx, cancel, &on_snapshot).await {
                        Ok(()) | Err(Error::Cancelled) => {}
                        Err(e) => debug!("Page {} left errored: {}", page.index, e),
                    }
                    let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(progress) = progress {
                        progress(done, total);
                    }
                })
                .buffer_unordered(self.concurrency)
                .collect::<Vec<()>>()
                .await;
        }
        drop(tx);

        let status = chapter.refresh_status();
        let mut persistence_errors = match writer {
            Some(handle) => handle.await.unwrap_or_else(|e| vec![format!("snapshot writer failed: {e}")]),
            None => Vec::new(),
        };

        // The final state is written once more so the chapter status on disk
        // matches the result even when no page changed.
        if let Some(store) = &self.store {
            if let Err(e) = store.persist(chapter) {
                warn!("Failed to save project: {}", e);
                persistence_errors.push(e.to_string());
            }
        }

        let stats_after = self.processor.cache().stats();
        let result = ChapterResult {
            chapter_id: chapter.id,
            status,
            pages: chapter.pages.iter().map(PageResult::from_page).collect(),
            failed_pages: chapter.failed_pages().map(|p| p.index).collect(),
            cancelled: cancel.is_cancelled(),
            saved: self.store.is_some() && persistence_errors.is_empty(),
            persistence_errors,
            cache_hits: stats_after.hits.saturating_sub(stats_before.hits),
            cache_misses: stats_after.misses.saturating_sub(stats_before.misses),
        };

        info!(
            "Chapter '{}' {}: {} done, {} failed",
            chapter.name,
            result.status,
            chapter.done_pages().count(),
            result.failed_pages.len()
        );
        result
    }

    /// Send lettered pages back to `Erased` so the next run redraws them,
    /// e.g. after changing the font. Returns the number of pages affected.
    pub fn rerender(&self, chapter: &mut Chapter) -> usize {
        let count = chapter.rerender();
        info!("Marked {} pages of '{}' for re-lettering", count, chapter.name);
        count
    }

    /// Export every `Done` page; other pages are skipped and reported.
    pub fn export(&self, chapter: &Chapter, writer: &dyn ExportWriter) -> Result<ExportSummary> {
        let mut pages = Vec::new();
        let mut skipped_pages = Vec::new();
        for page in &chapter.pages {
            match ExportPage::from_page(page) {
                Some(export) => pages.push(export),
                None => skipped_pages.push(page.index),
            }
        }

        if pages.is_empty() {
            return Err(Error::Export(format!(
                "chapter '{}' has no finished pages",
                chapter.name
            )));
        }
        if !skipped_pages.is_empty() {
            warn!("Skipping {} unfinished pages in export", skipped_pages.len());
        }

        let images = writer.write_images(&pages)?;
        let document = if self.export_document {
            Some(writer.write_document(&pages)?)
        } else {
            None
        };

        Ok(ExportSummary {
            images,
            document,
            skipped_pages,
        })
    }
}

/// Applies page snapshots to a private copy of the chapter and saves it.
/// Returns the persistence errors seen.
async fn write_snapshots(
    store: ProjectStore,
    mut chapter: Chapter,
    mut rx: mpsc::UnboundedReceiver<(usize, Page)>,
) -> Vec<String> {
    let mut errors = Vec::new();
    while let Some((position, page)) = rx.recv().await {
        apply_snapshot(&mut chapter, position, page);
        // Coalesce a burst into one write of the latest state.
        while let Ok((position, page)) = rx.try_recv() {
            apply_snapshot(&mut chapter, position, page);
        }
        chapter.refresh_status();

        let snapshot = chapter.clone();
        let store = store.clone();
        let written = tokio::task::spawn_blocking(move || store.persist(&snapshot))
            .await
            .map_err(|e| Error::Worker(e.to_string()))
            .and_then(|r| r);
        if let Err(e) = written {
            warn!("Failed to save project snapshot: {}", e);
            errors.push(e.to_string());
        }
    }
    errors
}

fn apply_snapshot(chapter: &mut Chapter, position: usize, page: Page) {
    if let Some(slot) = chapter.pages.get_mut(position) {
        *slot = page;
    }
}

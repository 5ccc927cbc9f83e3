//! Chapters: ordered pages processed and exported together.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::Lang;
use crate::error::{Error, Result};
use crate::page::{Page, ProcessingStatus};

/// Image extensions picked up by [`scan_folder`] (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    PartiallyComplete,
}

impl fmt::Display for ChapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Complete => "complete",
            Self::PartiallyComplete => "partially complete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: Uuid,
    pub name: String,
    pub pages: Vec<Page>,
    pub source_lang: Lang,
    pub target_lang: Lang,
    /// Font chosen for lettering; a system font is used when absent
    #[serde(default)]
    pub font_selection: Option<PathBuf>,
    #[serde(default)]
    pub status: ChapterStatus,
}

impl Chapter {
    pub fn new(name: impl Into<String>, pages: Vec<Page>, source_lang: Lang, target_lang: Lang) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            pages,
            source_lang,
            target_lang,
            font_selection: None,
            status: ChapterStatus::Pending,
        }
    }

    /// Build a chapter from every supported image in `dir`, in file name order.
    pub fn from_folder(dir: &Path, name: impl Into<String>, source_lang: Lang, target_lang: Lang) -> Result<Self> {
        let pages = scan_folder(dir)?
            .into_iter()
            .enumerate()
            .map(|(index, path)| Page::new(index, path))
            .collect();
        Ok(Self::new(name, pages, source_lang, target_lang))
    }

    /// Derive the chapter status from its pages.
    pub fn refresh_status(&mut self) -> ChapterStatus {
        let total = self.pages.len();
        let done = self.pages.iter().filter(|p| p.processing_status.is_done()).count();
        let errored = self.pages.iter().filter(|p| p.processing_status.is_errored()).count();
        let untouched = self
            .pages
            .iter()
            .filter(|p| p.processing_status == ProcessingStatus::Pending)
            .count();

        self.status = if done == total {
            ChapterStatus::Complete
        } else if untouched == total {
            ChapterStatus::Pending
        } else if done + errored == total {
            ChapterStatus::PartiallyComplete
        } else {
            ChapterStatus::InProgress
        };
        self.status
    }

    /// Send every lettered page back to `Erased`, e.g. after a font change.
    /// Returns the number of pages affected.
    pub fn rerender(&mut self) -> usize {
        let count = self.pages.iter_mut().map(Page::rerender).filter(|changed| *changed).count();
        if count > 0 {
            self.refresh_status();
        }
        count
    }

    /// Switch the language pair. Translations made for the old pair are
    /// dropped so the next run translates every region again. Returns whether
    /// anything changed.
    pub fn set_languages(&mut self, source_lang: Lang, target_lang: Lang) -> bool {
        if self.source_lang == source_lang && self.target_lang == target_lang {
            return false;
        }
        self.source_lang = source_lang;
        self.target_lang = target_lang;
        for page in &mut self.pages {
            page.discard_translations();
        }
        self.refresh_status();
        true
    }

    pub fn done_pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.iter().filter(|p| p.processing_status.is_done())
    }

    pub fn failed_pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.iter().filter(|p| p.processing_status.is_errored())
    }
}

/// Supported images directly inside `dir`, de-duplicated and sorted by
/// lowercase file name.
pub fn scan_folder(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::ResourceMissing(format!("chapter folder {}", dir.display())));
    }

    let mut found = BTreeSet::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let supported = path.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()));
        if supported {
            found.insert(path);
        }
    }

    let mut images: Vec<PathBuf> = found.into_iter().collect();
    images.sort_by_cached_key(|p| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });
    debug!("Found {} images in {}", images.len(), dir.display());
    Ok(images)
}

//! Utility functions shared across the crate.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Directory name used under the XDG config and cache roots.
pub const APP_DIR_NAME: &str = "comic-translator";

/// Get the user's config directory following XDG conventions.
///
/// Returns `$XDG_CONFIG_HOME` if set, otherwise `$HOME/.config`.
pub fn config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
}

/// Get the user's cache directory following XDG conventions.
///
/// Returns `$XDG_CACHE_HOME` if set, otherwise `$HOME/.cache`.
pub fn cache_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
}

/// Get the default translation cache path.
pub fn translation_cache_path() -> PathBuf {
    cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join(APP_DIR_NAME)
}

/// Clear the translation cache on disk.
///
/// Returns the number of entries cleared, or an error message.
pub fn clear_translation_cache(path: Option<&Path>) -> std::result::Result<usize, String> {
    let cache_path = path.map_or_else(translation_cache_path, Path::to_path_buf);

    if !cache_path.exists() {
        return Ok(0);
    }

    let db = sled::open(&cache_path)
        .map_err(|e| format!("Failed to open cache: {e}"))?;

    let count = db.len();
    db.clear().map_err(|e| format!("Failed to clear cache: {e}"))?;
    db.flush().map_err(|e| format!("Failed to flush cache: {e}"))?;

    Ok(count)
}

/// Write `bytes` to `path` by writing a sibling temp file and renaming it over
/// the target, so readers only ever observe the old or the new content.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| {
        Error::Persistence(format!("Failed to create {}: {e}", dir.display()))
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| {
        Error::Persistence(format!("Failed to create temp file in {}: {e}", dir.display()))
    })?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| Error::Persistence(format!("Failed to write {}: {e}", path.display())))?;
    tmp.persist(path)
        .map_err(|e| Error::Persistence(format!("Failed to replace {}: {}", path.display(), e.error)))?;

    Ok(())
}

/// Shorten text for log lines.
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    }
}

use sled::Db;
use std::path::Path;
use tracing::{debug, warn};

use super::CacheEntry;
use crate::error::{Error, Result};

/// Disk-based layer using sled. Values are JSON [`CacheEntry`] records.
#[derive(Clone)]
pub struct DiskCache {
    db: Db,
}

impl DiskCache {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::CacheInit(format!(
                    "Failed to create cache directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let db = sled::open(path).map_err(|e| {
            let err_str = e.to_string();
            // Detect lock errors and provide actionable fix
            if err_str.contains("WouldBlock") || err_str.contains("lock") {
                Error::CacheInit(format!(
                    "Cache locked at {}\n\n\
                    Another process is using the cache, or a previous instance crashed.\n\
                    To fix: rm {}/db/LOCK",
                    path.display(),
                    path.display()
                ))
            } else {
                Error::CacheInit(format!("Failed to open cache at {}: {}", path.display(), e))
            }
        })?;

        debug!("Opened disk cache at {}", path.display());

        Ok(Self { db })
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        match self.db.get(key.as_bytes()) {
            Ok(Some(value)) => match serde_json::from_slice(&value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Ignoring corrupt cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Cache read error: {}", e);
                None
            }
        }
    }

    /// Write `entry` unless the key already exists. Entries are immutable, so
    /// an existing record wins and is returned.
    pub fn insert_if_absent(&self, key: &str, entry: &CacheEntry) -> Result<CacheEntry> {
        let bytes = serde_json::to_vec(entry).map_err(|e| Error::CacheWrite(e.to_string()))?;

        let swapped = self
            .db
            .compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(bytes))
            .map_err(|e| Error::CacheWrite(e.to_string()))?;

        let kept = match swapped {
            Ok(()) => entry.clone(),
            Err(existing) => existing
                .current
                .and_then(|raw| serde_json::from_slice(&raw).ok())
                .unwrap_or_else(|| entry.clone()),
        };

        // Flush to ensure persistence
        self.db
            .flush()
            .map_err(|e| Error::CacheWrite(format!("Flush failed: {e}")))?;

        Ok(kept)
    }

    pub fn clear(&self) -> Result<()> {
        self.db.clear().map_err(|e| Error::CacheWrite(e.to_string()))?;
        self.db
            .flush()
            .map_err(|e| Error::CacheWrite(format!("Flush failed: {e}")))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

mod disk;
mod key;
mod memory;

pub use disk::DiskCache;
pub use key::{normalize_text, CacheKey};
pub use memory::MemoryCache;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{CacheConfig, Lang};
use crate::error::Result;
use crate::translator::Translator;

/// One memoized translation. Entries are never overwritten once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub normalized_text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub translated_text: String,
    /// Unix seconds
    pub created_at: u64,
}

impl CacheEntry {
    fn new(key: &CacheKey, translated_text: String) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        Self {
            normalized_text: key.normalized_text().to_string(),
            source_lang: key.source_lang().to_string(),
            target_lang: key.target_lang().to_string(),
            translated_text,
            created_at,
        }
    }
}

/// Hit/miss counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from a stored layer or by joining an in-flight call
    pub hits: u64,
    /// Lookups that started an external call
    pub misses: u64,
}

type InFlight = Shared<BoxFuture<'static, Result<String>>>;

struct Inner {
    memory: Option<MemoryCache>,
    disk: Option<DiskCache>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Memoizing translation cache with memory and disk layers.
///
/// Cloning is cheap and every clone shares the same layers and in-flight
/// map, so one instance is created per application and handed to every
/// pipeline that needs it.
#[derive(Clone)]
pub struct TranslationCache {
    inner: Arc<Inner>,
}

impl TranslationCache {
    /// Create a new translation cache from configuration
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let memory = if config.memory_enabled {
            Some(MemoryCache::new(
                config.memory_max_mb,
                config.memory_ttl_seconds,
            ))
        } else {
            None
        };

        let disk = if config.disk_enabled {
            let path = config
                .disk_path
                .clone()
                .unwrap_or_else(crate::util::translation_cache_path);
            Some(DiskCache::new(path)?)
        } else {
            None
        };

        Ok(Self::from_layers(memory, disk))
    }

    /// Memory-only cache, nothing persisted.
    pub fn in_memory() -> Self {
        let config = CacheConfig::default();
        Self::from_layers(
            Some(MemoryCache::new(config.memory_max_mb, config.memory_ttl_seconds)),
            None,
        )
    }

    fn from_layers(memory: Option<MemoryCache>, disk: Option<DiskCache>) -> Self {
        Self {
            inner: Arc::new(Inner {
                memory,
                disk,
                in_flight: Mutex::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    /// Get a stored translation
    pub async fn lookup(&self, text: &str, source: &Lang, target: &Lang) -> Option<String> {
        self.lookup_key(&CacheKey::new(text, source, target)).await
    }

    /// Store a translation. If the key already has an entry it is kept and
    /// returned instead.
    pub async fn store(
        &self,
        text: &str,
        source: &Lang,
        target: &Lang,
        translation: &str,
    ) -> Result<String> {
        self.store_key(&CacheKey::new(text, source, target), translation.to_string())
            .await
    }

    /// Return the stored translation, or run `translate` exactly once for the
    /// key and store its result.
    ///
    /// Concurrent calls for the same key share one call to `translate`; every
    /// caller receives the same result. A failure is handed to every waiter,
    /// is not stored, and the next call retries.
    pub async fn get_or_translate<F, Fut>(
        &self,
        text: &str,
        source: &Lang,
        target: &Lang,
        translate: F,
    ) -> Result<String>
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let key = CacheKey::new(text, source, target);

        if let Some(hit) = self.lookup_key(&key).await {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        let pending = {
            let mut in_flight = self.inner.in_flight.lock().await;
            if let Some(existing) = in_flight.get(key.as_str()) {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                existing.clone()
            } else {
                // Another caller may have finished between the first lookup
                // and taking the lock.
                if let Some(hit) = self.lookup_key(&key).await {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(hit);
                }
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss for {}, translating", key);

                let fut = self.clone().resolve(key.clone(), translate).boxed().shared();
                in_flight.insert(key.as_str().to_string(), fut.clone());
                fut
            }
        };

        pending.await
    }

    /// Translate through `translator`, memoized.
    pub async fn translate_with(
        &self,
        translator: &Arc<dyn Translator>,
        text: &str,
        source: &Lang,
        target: &Lang,
    ) -> Result<String> {
        let translator = Arc::clone(translator);
        let (src, tgt) = (source.clone(), target.clone());
        self.get_or_translate(text, source, target, move |normalized| async move {
            translator.translate(&normalized, &src, &tgt).await
        })
        .await
    }

    /// Clear all layers
    pub async fn clear(&self) -> Result<()> {
        self.inner.in_flight.lock().await.clear();

        if let Some(ref memory) = self.inner.memory {
            memory.clear();
        }

        if let Some(ref disk) = self.inner.disk {
            disk.clear()?;
        }
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
        }
    }

    async fn resolve<F, Fut>(self, key: CacheKey, translate: F) -> Result<String>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let result = translate(key.normalized_text().to_string()).await;

        let result = match result {
            Ok(translated) => match self.store_key(&key, translated.clone()).await {
                Ok(kept) => Ok(kept),
                Err(e) => {
                    // The translation is still good for this run.
                    warn!("Failed to persist translation for {}: {}", key, e);
                    Ok(translated)
                }
            },
            Err(e) => {
                debug!("Translation for {} failed, not caching: {}", key, e);
                Err(e)
            }
        };

        self.inner.in_flight.lock().await.remove(key.as_str());
        result
    }

    async fn lookup_key(&self, key: &CacheKey) -> Option<String> {
        // Try memory cache first
        if let Some(ref memory) = self.inner.memory
            && let Some(value) = memory.get(key.as_str()).await
        {
            return Some(value);
        }

        // Try disk cache
        if let Some(ref disk) = self.inner.disk
            && let Some(entry) = disk.get(key.as_str())
        {
            // Populate memory cache on disk hit
            if let Some(ref memory) = self.inner.memory {
                memory
                    .insert_if_absent(key.as_str().to_string(), entry.translated_text.clone())
                    .await;
            }
            return Some(entry.translated_text);
        }

        None
    }

    async fn store_key(&self, key: &CacheKey, translated: String) -> Result<String> {
        // Disk is authoritative when enabled: whatever it holds is what the
        // memory layer mirrors.
        let kept = match self.inner.disk {
            Some(ref disk) => {
                disk.insert_if_absent(key.as_str(), &CacheEntry::new(key, translated))?
                    .translated_text
            }
            None => translated,
        };

        match self.inner.memory {
            Some(ref memory) => Ok(memory.insert_if_absent(key.as_str().to_string(), kept).await),
            None => Ok(kept),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn langs() -> (Lang, Lang) {
        (Lang::new("en"), Lang::new("fr"))
    }

    fn disk_config(dir: &std::path::Path) -> CacheConfig {
        CacheConfig {
            disk_path: Some(dir.join("cache")),
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn test_store_then_lookup_normalizes() {
        let cache = TranslationCache::in_memory();
        let (en, fr) = langs();
        cache.store("Hello   world", &en, &fr, "Bonjour le monde").await.unwrap();

        assert_eq!(
            cache.lookup(" Hello world\n", &Lang::new("EN"), &fr).await.as_deref(),
            Some("Bonjour le monde")
        );
        assert_eq!(cache.lookup("hello world", &en, &fr).await, None);
    }

    #[tokio::test]
    async fn test_entries_are_immutable() {
        let cache = TranslationCache::in_memory();
        let (en, fr) = langs();
        cache.store("Hello", &en, &fr, "Bonjour").await.unwrap();
        let kept = cache.store("Hello", &en, &fr, "Salut").await.unwrap();

        assert_eq!(kept, "Bonjour");
        assert_eq!(cache.lookup("Hello", &en, &fr).await.as_deref(), Some("Bonjour"));
    }

    #[tokio::test]
    async fn test_concurrent_requests_coalesce() {
        let cache = TranslationCache::in_memory();
        let calls = Arc::new(AtomicUsize::new(0));
        let (en, fr) = langs();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            let (en, fr) = (en.clone(), fr.clone());
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_translate("Hello", &en, &fr, move |text| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(format!("{text} -> fr"))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "Hello -> fr");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 15, misses: 1 });
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = TranslationCache::in_memory();
        let (en, fr) = langs();

        let err = cache
            .get_or_translate("Hello", &en, &fr, |_| async {
                Err(Error::TranslationTimeout)
            })
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(cache.lookup("Hello", &en, &fr).await, None);

        let ok = cache
            .get_or_translate("Hello", &en, &fr, |_| async { Ok("Bonjour".to_string()) })
            .await
            .unwrap();
        assert_eq!(ok, "Bonjour");
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test]
    async fn test_disk_layer_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let (en, fr) = langs();
        {
            let cache = TranslationCache::new(&disk_config(dir.path())).unwrap();
            cache
                .get_or_translate("Hello", &en, &fr, |_| async { Ok("Bonjour".to_string()) })
                .await
                .unwrap();
        }

        let cache = TranslationCache::new(&disk_config(dir.path())).unwrap();
        let result = cache
            .get_or_translate("Hello", &en, &fr, |_| async {
                Err(Error::TranslationRequest("should not be called".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(result, "Bonjour");
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 0 });
    }

    #[tokio::test]
    async fn test_clear_removes_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TranslationCache::new(&disk_config(dir.path())).unwrap();
        let (en, fr) = langs();
        cache.store("Hello", &en, &fr, "Bonjour").await.unwrap();

        cache.clear().await.unwrap();
        assert_eq!(cache.lookup("Hello", &en, &fr).await, None);
    }
}

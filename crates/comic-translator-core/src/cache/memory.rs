use moka::future::Cache;
use std::time::Duration;

/// In-memory layer using moka with byte-size-based eviction.
#[derive(Clone)]
pub struct MemoryCache {
    cache: Cache<String, String>,
}

impl MemoryCache {
    pub fn new(max_mb: u64, ttl_seconds: u64) -> Self {
        let max_bytes = max_mb.saturating_mul(1024 * 1024);

        let mut builder = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|key: &String, value: &String| -> u32 {
                // Weight is the stored byte size, capped at u32::MAX
                (key.len() + value.len()).try_into().unwrap_or(u32::MAX)
            });

        if ttl_seconds > 0 {
            builder = builder.time_to_live(Duration::from_secs(ttl_seconds));
        }

        Self {
            cache: builder.build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.cache.get(key).await
    }

    /// Insert unless the key is already present; returns the value kept.
    pub async fn insert_if_absent(&self, key: String, value: String) -> String {
        self.cache.entry(key).or_insert(value).await.into_value()
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

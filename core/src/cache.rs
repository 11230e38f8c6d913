//! In-memory cache of downloaded image bytes, keyed by source URL.
//!
//! Entries are only added after a successful download and live for as long
//! as the cache does. A bounded cache may drop entries to stay under its byte
//! budget; callers treat that as an ordinary miss.

use bytes::Bytes;
use mini_moka::sync::Cache;
use tracing::debug;

/// Byte payloads keyed by URL. Cloning shares the same underlying store.
#[derive(Clone)]
pub struct ImageCache {
    entries: Cache<String, Bytes>,
}

impl ImageCache {
    /// A cache with no size bound, no TTL and no eviction.
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().build(),
        }
    }

    /// A cache that keeps at most roughly `max_bytes` of payload.
    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self {
            entries: Cache::builder()
                .weigher(|_url: &String, bytes: &Bytes| u32::try_from(bytes.len()).unwrap_or(u32::MAX))
                .max_capacity(max_bytes)
                .build(),
        }
    }

    pub fn get(&self, url: &str) -> Option<Bytes> {
        self.entries.get(&url.to_string())
    }

    pub fn insert(&self, url: &str, bytes: Bytes) {
        debug!(url, len = bytes.len(), "caching image bytes");
        self.entries.insert(url.to_string(), bytes);
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(&url.to_string())
    }

    pub fn remove(&self, url: &str) {
        self.entries.invalidate(&url.to_string());
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit() {
        let cache = ImageCache::new();
        let url = "https://cataas.com/cat/abc";
        assert!(cache.get(url).is_none());

        cache.insert(url, Bytes::from_static(b"\x89PNG"));
        assert_eq!(cache.get(url), Some(Bytes::from_static(b"\x89PNG")));
        assert!(cache.contains(url));
    }

    #[test]
    fn clones_share_entries() {
        let cache = ImageCache::new();
        let other = cache.clone();
        cache.insert("u", Bytes::from_static(b"x"));
        assert_eq!(other.get("u"), Some(Bytes::from_static(b"x")));
    }

    #[test]
    fn keys_are_exact_urls() {
        let cache = ImageCache::new();
        cache.insert("https://cataas.com/cat/a", Bytes::from_static(b"a"));
        assert!(cache.get("https://cataas.com/cat/A").is_none());
        assert!(cache.get("https://cataas.com/cat/a/").is_none());
    }

    #[test]
    fn remove_and_clear_turn_hits_into_misses() {
        let cache = ImageCache::new();
        cache.insert("a", Bytes::from_static(b"1"));
        cache.insert("b", Bytes::from_static(b"2"));
        cache.remove("a");
        assert!(cache.get("a").is_none());
        cache.clear();
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn bounded_cache_still_serves_small_entries() {
        let cache = ImageCache::with_max_bytes(1024);
        cache.insert("small", Bytes::from(vec![0u8; 16]));
        assert_eq!(cache.get("small").map(|b| b.len()), Some(16));
    }
}

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use sha2::{Digest, Sha256};

use super::normalize::normalize;

type CacheKey = ([u8; 32], String);

/// Normalized display text, keyed by the SHA-256 of the raw markup and the
/// course it was rendered for. A document is never looked up by key alone
/// since the file behind a key may change.
pub struct RenderCache {
    entries: Mutex<LruCache<CacheKey, Arc<str>>>,
}

impl RenderCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get_or_render(&self, markup: &str, course: &str) -> Arc<str> {
        let key: CacheKey = (Sha256::digest(markup.as_bytes()).into(), course.to_string());
        if let Ok(mut entries) = self.entries.lock() {
            if let Some(hit) = entries.get(&key) {
                return Arc::clone(hit);
            }
        }
        // render outside the lock; concurrent misses on one key both render
        let rendered: Arc<str> = Arc::from(normalize(markup));
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(key, Arc::clone(&rendered));
        }
        rendered
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> RenderCache {
        RenderCache::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_hit_returns_same_allocation() {
        let c = cache(4);
        let first = c.get_or_render("<p>Groups</p>", "GRM");
        let second = c.get_or_render("<p>Groups</p>", "GRM");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(&*first, "Groups");
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_course_is_part_of_key() {
        let c = cache(4);
        let a = c.get_or_render("<p>Rings</p>", "GRM");
        let b = c.get_or_render("<p>Rings</p>", "NST");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_changed_content_misses() {
        let c = cache(4);
        c.get_or_render("<p>v1</p>", "GRM");
        let updated = c.get_or_render("<p>v2</p>", "GRM");
        assert_eq!(&*updated, "v2");
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let c = cache(2);
        for i in 0..10 {
            c.get_or_render(&format!("<p>page {i}</p>"), "GRM");
        }
        assert_eq!(c.len(), 2);
    }
}

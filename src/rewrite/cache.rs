//! In-memory LRU rewrite cache with TTL.
//! Key: blake3 hash of (target_language | proficiency | density | text).
//! Repeated boilerplate across a page (nav items, footers) hits here
//! instead of spending a second service call.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use super::{RewriteOutcome, Substitution};
use crate::store::Proficiency;

struct CacheEntry {
    text: String,
    replacements: Vec<Substitution>,
    inserted_at: Instant,
}

pub struct RewriteCache {
    inner: Mutex<LruCache<[u8; 32], CacheEntry>>,
    ttl: Duration,
}

impl RewriteCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("cache capacity must be > 0"),
            )),
            ttl,
        }
    }

    /// Compute the cache key from weave parameters.
    pub fn compute_key(
        target_language: &str,
        proficiency: Proficiency,
        density_percent: u8,
        text: &str,
    ) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(target_language.as_bytes());
        hasher.update(b"|");
        hasher.update(proficiency.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(&[density_percent]);
        hasher.update(b"|");
        hasher.update(text.as_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Look up a cached outcome. Returns None if absent or expired.
    pub fn get(&self, key: &[u8; 32]) -> Option<RewriteOutcome> {
        let mut cache = self.inner.lock();
        if let Some(entry) = cache.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(RewriteOutcome {
                    text: entry.text.clone(),
                    replacements: entry.replacements.clone(),
                    cached: true,
                });
            }
            // Expired — remove it
            cache.pop(key);
        }
        None
    }

    /// Insert a rewrite outcome into the cache.
    pub fn insert(&self, key: [u8; 32], text: String, replacements: Vec<Substitution>) {
        let mut cache = self.inner.lock();
        cache.put(
            key,
            CacheEntry {
                text,
                replacements,
                inserted_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(o: &str, r: &str) -> Substitution {
        Substitution {
            original: o.into(),
            replacement: r.into(),
        }
    }

    #[test]
    fn hit_returns_stored_outcome_marked_cached() {
        let cache = RewriteCache::new(8, Duration::from_secs(60));
        let key = RewriteCache::compute_key("spanish", Proficiency::Beginner, 50, "hello world");
        cache.insert(key, "hola world".into(), vec![sub("hello", "hola")]);

        let hit = cache.get(&key).expect("cache hit");
        assert!(hit.cached);
        assert_eq!(hit.text, "hola world");
        assert_eq!(hit.replacements.len(), 1);
    }

    #[test]
    fn different_parameters_produce_different_keys() {
        let a = RewriteCache::compute_key("spanish", Proficiency::Beginner, 50, "text");
        let b = RewriteCache::compute_key("spanish", Proficiency::Advanced, 50, "text");
        let c = RewriteCache::compute_key("spanish", Proficiency::Beginner, 60, "text");
        let d = RewriteCache::compute_key("french", Proficiency::Beginner, 50, "text");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn expired_entries_miss_and_evict() {
        let cache = RewriteCache::new(8, Duration::ZERO);
        let key = RewriteCache::compute_key("spanish", Proficiency::Beginner, 50, "x");
        cache.insert(key, "x".into(), Vec::new());
        assert!(cache.get(&key).is_none());
    }
}

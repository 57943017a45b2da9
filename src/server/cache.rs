use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Rendered pages keyed by path and query, each valid for `ttl`.
pub struct RenderCache {
    pages: DashMap<String, CachedPage>,
    ttl: Duration,
}

#[derive(Clone)]
struct CachedPage {
    body: Arc<[u8]>,
    stored: Instant,
}

impl CachedPage {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.stored) >= ttl
    }
}

impl RenderCache {
    /// `None` for a zero TTL: caching is off.
    pub fn new(ttl: Duration) -> Option<Self> {
        if ttl.is_zero() {
            return None;
        }
        Some(Self {
            pages: DashMap::new(),
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        let now = Instant::now();
        let page = self.pages.get(key)?.clone();
        if page.is_expired(now, self.ttl) {
            self.pages
                .remove_if(key, |_, current| current.is_expired(now, self.ttl));
            return None;
        }
        Some(page.body)
    }

    pub fn insert(&self, key: impl Into<String>, body: impl Into<Arc<[u8]>>) {
        self.pages.insert(
            key.into(),
            CachedPage {
                body: body.into(),
                stored: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Drop every expired page and return how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.pages.len();
        self.pages
            .retain(|_, page| !page.is_expired(now, self.ttl));
        before.saturating_sub(self.pages.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_ttl_disables_the_cache() {
        assert!(RenderCache::new(Duration::ZERO).is_none());
    }

    #[test]
    fn serves_until_expiry() {
        let cache = RenderCache::new(Duration::from_secs(60)).unwrap();
        cache.insert("/about", b"<html>about</html>".to_vec());
        assert_eq!(cache.get("/about").as_deref(), Some(&b"<html>about</html>"[..]));
        assert!(cache.get("/about?tab=2").is_none());
    }

    fn stale(cache: &RenderCache, key: &str) {
        cache.pages.insert(
            key.into(),
            CachedPage {
                body: Arc::from(&b"stale"[..]),
                stored: Instant::now() - Duration::from_secs(600),
            },
        );
    }

    #[test]
    fn expired_pages_are_misses() {
        let cache = RenderCache::new(Duration::from_secs(300)).unwrap();
        stale(&cache, "/old");
        assert!(cache.get("/old").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn prune_removes_stale_pages() {
        let cache = RenderCache::new(Duration::from_secs(300)).unwrap();
        cache.insert("/fresh", b"fresh".to_vec());
        stale(&cache, "/stale");

        assert_eq!(cache.prune_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("/fresh").is_some());
    }
}

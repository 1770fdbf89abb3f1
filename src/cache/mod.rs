//! # Cache Module
//!
//! Process-lifetime cache for track titles and thumbnails.
//!
//! Entries are keyed by the raw source reference the user supplied (or the
//! canonical link it expanded to). The cache is never persisted and never
//! evicts: the reference space is driven by human requests and stays small
//! relative to the lifetime of the process. After a restart the first lookup
//! of each reference is a real network call again.
//!
//! ```rust,ignore
//! let cache = TrackInfoCache::new();
//! cache.put_title("https://youtu.be/abc", "Example Song".to_string());
//! assert_eq!(cache.title("https://youtu.be/abc").as_deref(), Some("Example Song"));
//! ```

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Title and thumbnail cache shared by every guild.
#[derive(Debug, Default)]
pub struct TrackInfoCache {
    titles: DashMap<String, String>,
    /// `None` records "this reference has no thumbnail" so it is not looked up again.
    thumbnails: DashMap<String, Option<String>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TrackInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Título cacheado para una referencia
    pub fn title(&self, reference: &str) -> Option<String> {
        let found = self.titles.get(reference).map(|t| t.value().clone());
        self.record(found.is_some());
        found
    }

    pub fn put_title(&self, reference: impl Into<String>, title: String) {
        let reference = reference.into();
        debug!("💾 Título cacheado: {} -> {}", reference, title);
        self.titles.insert(reference, title);
    }

    /// Miniatura cacheada. El `Option` externo indica si hubo hit.
    pub fn thumbnail(&self, reference: &str) -> Option<Option<String>> {
        let found = self.thumbnails.get(reference).map(|t| t.value().clone());
        self.record(found.is_some());
        found
    }

    pub fn put_thumbnail(&self, reference: impl Into<String>, thumbnail: Option<String>) {
        self.thumbnails.insert(reference.into(), thumbnail);
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            titles: self.titles.len(),
            thumbnails: self.thumbnails.len(),
        }
    }

    fn record(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Métricas básicas del cache
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub titles: usize,
    pub thumbnails: usize,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

impl std::fmt::Display for CacheMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "🗃️ Cache: {} títulos, {} miniaturas, {} hits / {} misses ({:.1}% hit rate)",
            self.titles,
            self.thumbnails,
            self.hits,
            self.misses,
            self.hit_rate() * 100.0
        )
    }
}

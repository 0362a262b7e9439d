use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use pipeline_logging::pipeline_debug;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    items: Vec<T>,
    total_pages: u32,
    stored_at: Instant,
}

/// Time-bounded memo of listing results, keyed by strings such as
/// `source_{id}:popular:{page}`.
#[derive(Debug)]
pub struct SourceCache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> Default for SourceCache<T> {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }
}

impl<T: Clone> SourceCache<T> {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached items and page count, unless missing or older than the TTL.
    pub fn get(&self, key: &str) -> Option<(Vec<T>, u32)> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                Some((entry.items.clone(), entry.total_pages))
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: impl Into<String>, items: Vec<T>, total_pages: u32) {
        self.lock().insert(
            key.into(),
            CacheEntry {
                items,
                total_pages,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop every entry whose key starts with `prefix`.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    /// Drop every entry that has `source_{id}` as one of its `:`-separated segments.
    pub fn invalidate_for_source(&self, source_id: i64) -> usize {
        let segment = source_segment(source_id);
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.split(':').any(|part| part == segment));
        let removed = before - entries.len();
        pipeline_debug!("Invalidated {} cache entries for {}", removed, segment);
        removed
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        // A panic mid-insert leaves a consistent map; keep using it.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn source_segment(source_id: i64) -> String {
    format!("source_{source_id}")
}

pub fn popular_key(source_id: i64, page: u32) -> String {
    format!("{}:popular:{page}", source_segment(source_id))
}

pub fn search_key(source_id: i64, query: &str, page: u32) -> String {
    format!("{}:search:{query}:{page}", source_segment(source_id))
}

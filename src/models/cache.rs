//! Bounded, insertion-ordered model cache.
//!
//! Eviction is strict FIFO by insertion: `get` never reorders entries, and a
//! re-`put` of an existing name counts as a fresh insertion at the back.
//! Handles are `Arc`s, so evicting an entry only drops the cache's own
//! reference; callers that already hold a handle keep the model alive.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

/// Number of models kept resident unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),
}

struct Entry<M> {
    name: String,
    model: Arc<M>,
    load_seq: u64,
}

struct Inner<M> {
    entries: VecDeque<Entry<M>>,
    next_seq: u64,
}

/// Snapshot of what is resident.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatus {
    pub models_loaded: Vec<String>,
    pub cache_size: usize,
    pub max_cache_size: usize,
}

pub struct ModelCache<M> {
    capacity: usize,
    inner: RwLock<Inner<M>>,
}

impl<M> ModelCache<M> {
    /// A capacity of 0 would evict every model on insert; it is raised to 1.
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            log::warn!("Model cache capacity 0 is not usable, using 1");
        }
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(Inner {
                entries: VecDeque::new(),
                next_seq: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert or replace `name`, then evict the oldest entries until the
    /// cache fits. Returns the evicted names, oldest first.
    pub fn put(&self, name: impl Into<String>, model: M) -> Vec<String> {
        self.put_arc(name, Arc::new(model))
    }

    pub fn put_arc(&self, name: impl Into<String>, model: Arc<M>) -> Vec<String> {
        let name = name.into();
        let mut inner = self.inner.write();

        if let Some(pos) = inner.entries.iter().position(|e| e.name == name) {
            inner.entries.remove(pos);
        }
        let load_seq = inner.next_seq;
        inner.next_seq += 1;
        log::debug!("Caching model {name} (load #{load_seq})");
        inner.entries.push_back(Entry {
            name,
            model,
            load_seq,
        });

        Self::evict_locked(&mut inner, self.capacity)
    }

    /// Shared handle to `name`. Does not affect eviction order.
    pub fn get(&self, name: &str) -> Result<Arc<M>, CacheError> {
        self.inner
            .read()
            .entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| Arc::clone(&e.model))
            .ok_or_else(|| CacheError::ModelNotLoaded(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().entries.iter().any(|e| e.name == name)
    }

    /// Evict oldest entries until `len() <= capacity()`.
    pub fn evict_if_over_capacity(&self) -> Vec<String> {
        let mut inner = self.inner.write();
        Self::evict_locked(&mut inner, self.capacity)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident names in insertion order (next to be evicted first).
    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .entries
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    /// Load sequence number of `name`, if resident.
    pub fn load_order(&self, name: &str) -> Option<u64> {
        self.inner
            .read()
            .entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.load_seq)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let dropped = inner.entries.len();
        inner.entries.clear();
        log::info!("Model cache cleared ({dropped} models dropped)");
    }

    pub fn status(&self) -> CacheStatus {
        let models_loaded = self.names();
        CacheStatus {
            cache_size: models_loaded.len(),
            models_loaded,
            max_cache_size: self.capacity,
        }
    }

    fn evict_locked(inner: &mut Inner<M>, capacity: usize) -> Vec<String> {
        let mut evicted = Vec::new();
        while inner.entries.len() > capacity {
            if let Some(entry) = inner.entries.pop_front() {
                log::info!("Evicted model from cache: {}", entry.name);
                evicted.push(entry.name);
            }
        }
        evicted
    }
}

impl<M> Default for ModelCache<M> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_fourth_insert_evicts_first() {
        let cache = ModelCache::new(3);
        for name in ["a", "b", "c"] {
            assert!(cache.put(name, name.to_uppercase()).is_empty());
        }
        let evicted = cache.put("d", "D".to_string());
        assert_eq!(evicted, vec!["a".to_string()]);
        assert_eq!(cache.len(), 3);
        assert_eq!(
            cache.get("a").unwrap_err(),
            CacheError::ModelNotLoaded("a".to_string())
        );
        assert_eq!(*cache.get("b").unwrap(), "B");
        assert_eq!(cache.names(), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_get_does_not_refresh_order() {
        let cache = ModelCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        // Touch "a"; strict FIFO still evicts it next.
        assert_eq!(*cache.get("a").unwrap(), 1);
        assert_eq!(cache.put("c", 3), vec!["a".to_string()]);
    }

    #[test]
    fn test_reput_moves_to_back() {
        let cache = ModelCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert!(cache.put("a", 10).is_empty());
        assert_eq!(cache.names(), vec!["b", "a"]);
        assert_eq!(*cache.get("a").unwrap(), 10);
        assert_eq!(cache.put("c", 3), vec!["b".to_string()]);
        assert!(cache.load_order("a").unwrap() < cache.load_order("c").unwrap());
    }

    #[test]
    fn test_handle_survives_eviction() {
        let cache = ModelCache::new(1);
        cache.put("big", vec![1u8; 1024]);
        let handle = cache.get("big").unwrap();
        cache.put("other", vec![0u8]);
        assert!(!cache.contains("big"));
        assert_eq!(handle.len(), 1024);
        assert_eq!(Arc::strong_count(&handle), 1);
    }

    #[test]
    fn test_zero_capacity_coerced() {
        let cache = ModelCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.put("a", ());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_status_and_clear() {
        let cache: ModelCache<u32> = ModelCache::default();
        cache.put("x", 1);
        cache.put("y", 2);
        let status = cache.status();
        assert_eq!(status.models_loaded, vec!["x", "y"]);
        assert_eq!(status.cache_size, 2);
        assert_eq!(status.max_cache_size, DEFAULT_CAPACITY);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.evict_if_over_capacity().is_empty());
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let cache = Arc::new(ModelCache::new(3));
        cache.put("shared", 7u64);
        let ready = Arc::new(Barrier::new(5));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let ready = Arc::clone(&ready);
                thread::spawn(move || {
                    let handle = cache.get("shared").unwrap();
                    ready.wait();
                    let mut total = 0;
                    for _ in 0..1000 {
                        total += *handle;
                    }
                    total
                })
            })
            .collect();

        ready.wait();
        for i in 0..10 {
            cache.put(format!("m{i}"), i);
        }

        for r in readers {
            assert_eq!(r.join().unwrap(), 7000);
        }
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("shared"));
    }
}

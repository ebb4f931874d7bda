//! Bounded read cache for collection queries.
//!
//! Entries are keyed by the rendered SQL and parameters of a [`Query`] and
//! remember the doctype the query was pinned to. A write to a doctype drops
//! every entry for that doctype plus every entry whose query had no doctype
//! constraint. Entries also expire after a fixed TTL, which bounds how long
//! writes made outside this process (another `syl` invocation against the
//! same database) can go unseen.
//!
//! When full, the least recently used entry is evicted.
//!
//! Every invalidation bumps a generation counter. A reader that takes
//! [`QueryCache::generation`] before running its select and stores the rows
//! with [`QueryCache::put_at`] never caches rows that a concurrent write has
//! already made stale.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::models::Document;
use crate::query::Query;

#[derive(Debug, Clone)]
struct CacheEntry {
    doctype: Option<String>,
    docs: Vec<Document>,
    inserted_at: Instant,
}

pub struct QueryCache {
    /// `None` when the capacity is zero.
    cache: Option<LruCache<String, CacheEntry>>,
    ttl: Duration,
    generation: u64,
}

impl QueryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(LruCache::new),
            ttl,
            generation: 0,
        }
    }

    /// Number of entries, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bumped by every [`invalidate`](Self::invalidate) and
    /// [`clear`](Self::clear).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&mut self, query: &Query) -> Option<Vec<Document>> {
        let cache = self.cache.as_mut()?;
        let key = query.cache_key();
        let entry = cache.get(&key)?;
        if entry.inserted_at.elapsed() < self.ttl {
            return Some(entry.docs.clone());
        }
        cache.pop(&key);
        None
    }

    pub fn put(&mut self, query: &Query, docs: Vec<Document>) {
        if let Some(cache) = self.cache.as_mut() {
            let entry = CacheEntry {
                doctype: query.doctype().map(str::to_string),
                docs,
                inserted_at: Instant::now(),
            };
            cache.put(query.cache_key(), entry);
        }
    }

    /// Stores `docs` only if nothing was invalidated since `generation`
    /// was read.
    pub fn put_at(&mut self, generation: u64, query: &Query, docs: Vec<Document>) -> bool {
        if generation != self.generation {
            return false;
        }
        self.put(query, docs);
        true
    }

    /// Drops entries that may include documents of `doctype`.
    pub fn invalidate(&mut self, doctype: &str) {
        self.generation += 1;
        let Some(cache) = self.cache.as_mut() else {
            return;
        };
        let stale: Vec<String> = cache
            .iter()
            .filter(|(_, e)| e.doctype.as_deref().map_or(true, |d| d == doctype))
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }
    }
}

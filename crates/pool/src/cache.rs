//! Fixed-capacity keyed cache with least-recently-used eviction.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info};

use docindex_core::CoreResult;

struct CacheEntry<H: ?Sized> {
    handle: Arc<H>,
    last_used_rank: u64,
}

struct CacheState<H: ?Sized> {
    entries: HashMap<String, CacheEntry<H>>,
    /// Last rank handed out; strictly increasing across all accesses.
    rank: u64,
}

impl<H: ?Sized> CacheState<H> {
    fn bump_rank(&mut self) -> u64 {
        self.rank += 1;
        self.rank
    }

    fn least_recently_used(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used_rank)
            .map(|(key, _)| key.clone())
    }

    fn keys_by_rank(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.last_used_rank, key.clone()))
            .collect();
        keys.sort_unstable_by_key(|(rank, _)| *rank);
        keys.into_iter().map(|(_, key)| key).collect()
    }
}

/// Snapshot of a cache's occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub count: usize,
    pub capacity: usize,
    /// Cached keys, least recently used first.
    pub keys: Vec<String>,
}

/// Thread-safe cache mapping a key to a shared handle.
///
/// - At most `capacity` entries; one entry per key
/// - A hit refreshes the entry's recency, a miss at capacity evicts the least
///   recently used entry before constructing the new handle
/// - Eviction is unconditional: callers still holding an evicted `Arc` keep a
///   valid handle, but the next lookup builds a fresh one
/// - The whole lookup, including construction, runs under one lock, so a key is
///   never constructed twice concurrently
pub struct KeyedResourceCache<H: ?Sized> {
    name: String,
    capacity: usize,
    state: Mutex<CacheState<H>>,
}

impl<H: ?Sized> KeyedResourceCache<H> {
    /// Create an empty cache. A capacity of zero is raised to one.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                rank: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is cached. Does not affect recency.
    pub fn contains(&self, key: &str) -> bool {
        self.lock_state().entries.contains_key(key)
    }

    /// Return the handle for `key`, constructing it on a miss.
    ///
    /// Errors from `construct` are returned unchanged and nothing is cached.
    /// Note that the eviction made room for the new entry has already happened
    /// by then.
    pub fn get<F>(&self, key: &str, construct: F) -> CoreResult<Arc<H>>
    where
        F: FnOnce() -> CoreResult<Arc<H>>,
    {
        let mut state = self.lock_state();
        let rank = state.bump_rank();

        if let Some(entry) = state.entries.get_mut(key) {
            entry.last_used_rank = rank;
            debug!(cache = %self.name, key, "cache hit");
            return Ok(entry.handle.clone());
        }

        if state.entries.len() >= self.capacity {
            if let Some(evicted) = state.least_recently_used() {
                state.entries.remove(&evicted);
                info!(cache = %self.name, key = %evicted, "evicted least recently used handle");
            }
        }

        info!(cache = %self.name, key, "constructing handle");
        let handle = construct()?;
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                handle: handle.clone(),
                last_used_rank: rank,
            },
        );
        info!(cache = %self.name, key, size = state.entries.len(), "handle cached");

        Ok(handle)
    }

    /// Drop every entry and reset recency order.
    pub fn clear(&self) {
        let mut state = self.lock_state();
        state.entries.clear();
        state.rank = 0;
        info!(cache = %self.name, "cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock_state();
        CacheStats {
            count: state.entries.len(),
            capacity: self.capacity,
            keys: state.keys_by_rank(),
        }
    }

    // A panicking constructor poisons the lock after the map was left
    // consistent (nothing inserted), so the state is still usable.
    fn lock_state(&self) -> MutexGuard<'_, CacheState<H>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<H: ?Sized> fmt::Debug for KeyedResourceCache<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedResourceCache")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

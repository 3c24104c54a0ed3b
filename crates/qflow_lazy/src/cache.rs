//! Size-bounded component cache.
//!
//! Entries are charged their stored (possibly compressed) size. When an
//! insert would overflow the capacity, the entries worth least are evicted
//! first, where worth is access count divided by one plus idle seconds.
//! Idle age lowers worth: a heavily used entry left untouched for an hour
//! goes before one used a moment ago.

use crate::component::{Component, ComponentType, ComponentValue};
use crate::error::{LoadError, LoadResult};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One cached component
#[derive(Clone)]
pub struct CacheEntry {
    /// Component id
    pub id: String,
    /// Component type
    pub component_type: ComponentType,
    /// Size before compression
    pub size: usize,
    /// Bytes charged against the capacity
    pub stored_size: usize,
    /// Whether `stored_size` reflects compression
    pub compressed: bool,
    /// Load completion time
    pub loaded_at: DateTime<Utc>,
    /// Latest access
    pub last_access: DateTime<Utc>,
    /// Accesses, including the load
    pub access_count: u64,
    /// Loader wall time in milliseconds
    pub load_ms: u64,
    pub(crate) value: ComponentValue,
}

impl CacheEntry {
    fn component(&self) -> Component {
        Component {
            id: self.id.clone(),
            component_type: self.component_type,
            value: self.value.clone(),
        }
    }

    /// `access_count / (1 + idle_seconds)`, never raised by idling
    fn worth(&self, now: DateTime<Utc>) -> f64 {
        let idle = (now - self.last_access).num_milliseconds().max(0) as f64 / 1000.0;
        self.access_count as f64 / (1.0 + idle)
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("id", &self.id)
            .field("stored_size", &self.stored_size)
            .field("access_count", &self.access_count)
            .finish_non_exhaustive()
    }
}

/// Cache counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Cached components
    pub entries: usize,
    /// Bytes charged
    pub used_bytes: usize,
    /// Capacity
    pub max_bytes: usize,
    /// Compressed entries
    pub compressed_entries: usize,
    /// Bytes saved by compression across cached entries
    pub bytes_saved: usize,
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that needed a load
    pub misses: u64,
    /// Entries evicted to make room
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Components by id, bounded by stored bytes
#[derive(Debug)]
pub struct ComponentCache {
    entries: IndexMap<String, CacheEntry>,
    max_size: usize,
    used: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl ComponentCache {
    /// Empty cache holding up to `max_size` bytes
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            max_size,
            used: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up a component, counting the access
    pub fn get(&mut self, id: &str, now: DateTime<Utc>) -> Option<Component> {
        let entry = self.entries.get_mut(id)?;
        entry.access_count += 1;
        entry.last_access = now;
        self.hits += 1;
        Some(entry.component())
    }

    /// Count a lookup that needed a load
    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    /// Whether `id` is cached
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Cached entry, without counting an access
    #[must_use]
    pub fn entry(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    /// Cached ids in insertion order
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Cache `entry`, evicting until it fits. Returns the evicted ids.
    ///
    /// # Errors
    ///
    /// `TooLarge` if the entry exceeds the whole capacity
    pub fn insert(&mut self, entry: CacheEntry, now: DateTime<Utc>) -> LoadResult<Vec<String>> {
        if entry.stored_size > self.max_size {
            return Err(LoadError::TooLarge {
                id: entry.id,
                size: entry.stored_size,
                limit: self.max_size,
            });
        }
        if let Some(old) = self.entries.shift_remove(&entry.id) {
            self.used -= old.stored_size;
        }
        let evicted = self.evict_until(self.max_size - entry.stored_size, now);
        self.used += entry.stored_size;
        self.entries.insert(entry.id.clone(), entry);
        Ok(evicted)
    }

    /// Drop a cached entry
    pub fn remove(&mut self, id: &str) -> Option<CacheEntry> {
        let entry = self.entries.shift_remove(id)?;
        self.used -= entry.stored_size;
        Some(entry)
    }

    /// Change the capacity, evicting what no longer fits
    pub fn resize(&mut self, max_size: usize, now: DateTime<Utc>) -> Vec<String> {
        self.max_size = max_size;
        self.evict_until(max_size, now)
    }

    fn evict_until(&mut self, budget: usize, now: DateTime<Utc>) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.used > budget {
            let victim = self
                .entries
                .values()
                .min_by(|a, b| a.worth(now).total_cmp(&b.worth(now)))
                .map(|e| e.id.clone());
            let Some(victim) = victim else {
                break;
            };
            if self.remove(&victim).is_some() {
                self.evictions += 1;
                evicted.push(victim);
            }
        }
        evicted
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            used_bytes: self.used,
            max_bytes: self.max_size,
            compressed_entries: self.entries.values().filter(|e| e.compressed).count(),
            bytes_saved: self.entries.values().map(|e| e.size - e.stored_size).sum(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }

    /// Number of cached entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub(crate) struct NewEntry {
    pub id: String,
    pub component_type: ComponentType,
    pub size: usize,
    pub stored_size: usize,
    pub compressed: bool,
    pub load_ms: u64,
    pub value: ComponentValue,
}

impl NewEntry {
    pub(crate) fn at(self, now: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            id: self.id,
            component_type: self.component_type,
            size: self.size,
            stored_size: self.stored_size,
            compressed: self.compressed,
            loaded_at: now,
            last_access: now,
            access_count: 1,
            load_ms: self.load_ms,
            value: self.value,
        }
    }
}

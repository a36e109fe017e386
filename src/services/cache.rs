//! Process-wide key/value stores with time-to-live semantics.
//!
//! `TtlStore` is the seam call sites depend on, so the in-memory map can be
//! replaced by a shared store without touching the upstream client.
//! Entries expire lazily: an expired entry is invisible to `get` and is
//! dropped the next time it is encountered or when the map is pruned.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// A keyed store whose entries disappear after their time-to-live.
pub trait TtlStore<V>: Send + Sync {
    /// Return the value for `key` if it has not expired.
    fn get(&self, key: &str) -> Option<V>;

    /// Insert `value` for `key`, visible for `ttl` from now.
    fn set_with_ttl(&self, key: &str, value: V, ttl: Duration);

    /// Drop every expired entry.
    fn prune(&self);
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Bounded in-memory `TtlStore`.
///
/// Once the map holds `max_entries` items, inserting a new key first drops
/// expired entries and then, if still full, arbitrary ones.
pub struct MemoryStore<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    max_entries: usize,
}

impl<V: Clone> MemoryStore<V> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set_at(&self, key: &str, value: V, ttl: Duration, now: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            prune_bounded(&mut entries, self.max_entries - 1, |entry| {
                now < entry.expires_at
            });
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    pub fn prune_at(&self, now: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, entry| now < entry.expires_at);
    }
}

impl<V: Clone + Send> TtlStore<V> for MemoryStore<V> {
    fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) {
        self.set_at(key, value, ttl, Instant::now());
    }

    fn prune(&self) {
        self.prune_at(Instant::now());
    }
}

/// Shrink `map` to at most `limit` entries.
///
/// Entries for which `is_live` returns false go first; if the map is still
/// too large, arbitrary entries are evicted in iteration order.
pub(crate) fn prune_bounded<K, V>(
    map: &mut HashMap<K, V>,
    limit: usize,
    is_live: impl Fn(&V) -> bool,
) where
    K: Eq + Hash + Clone,
{
    if map.len() <= limit {
        return;
    }
    map.retain(|_, value| is_live(value));

    let excess = map.len().saturating_sub(limit);
    if excess > 0 {
        let victims: Vec<K> = map.keys().take(excess).cloned().collect();
        for key in victims {
            map.remove(&key);
        }
    }
}

// SPDX-License-Identifier: MIT

//! Hand-rolled TTL cache (spec §4.5, §8 round-trip property): a plain
//! `parking_lot::Mutex<HashMap<K, (V, Instant)>>`, matching the teacher's
//! preference for small hand-rolled structures over a crate like `moka`
//! for simple map+expiry logic. Built on `tokio::time::Instant` so tests
//! can pause/advance the clock instead of sleeping.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, (V, Instant)>>,
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts `value` under `key`, expiring `ttl` from now.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        self.entries.lock().insert(key, (value, Instant::now() + ttl));
    }

    /// Returns the cached value iff it was set and has not yet expired,
    /// evicting it on a stale hit (spec §8: "returns null after").
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn remove(&self, key: &K) {
        self.entries.lock().remove(key);
    }
}

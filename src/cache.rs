//! Action result cache (§4.I).
//!
//! A TTL-bounded key→value store consulted at action-runner step 2 (cache
//! lookup) and populated at step 6 (mapResult) when the action spec declares
//! a `cache` block. Eviction is lazy (on lookup) plus a periodic sweep;
//! there is no LRU/size bound, matching §4.I's "bounded only by TTL".

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::instrument;

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// Shared, thread-safe TTL cache for action results, keyed by the action's
/// resolved cache key (§4.E step 2/6).
#[derive(Default)]
pub struct Cache {
    entries: parking_lot::RwLock<FxHashMap<String, Entry>>,
}

impl Cache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key` if present and not expired,
    /// purging it lazily if it has (§4.I).
    #[instrument(skip(self))]
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let hit = {
            let entries = self.entries.read();
            entries.get(key).map(|e| (e.expires_at, e.value.clone()))
        };
        match hit {
            Some((expires_at, value)) if expires_at > now => Some(value),
            Some(_) => {
                self.entries.write().remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores `value` under `key` with the given time-to-live.
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        self.entries.write().insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Removes every entry whose key starts with `prefix` (§4.I
    /// `invalidate(pattern)`, implemented as prefix matching).
    pub fn invalidate(&self, prefix: &str) {
        self.entries.write().retain(|key, _| !key.starts_with(prefix));
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Sweeps all expired entries. Intended to be called periodically by the
    /// orchestrator's housekeeping tick rather than on every lookup.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.entries.write().retain(|_, e| e.expires_at > now);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

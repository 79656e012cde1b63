//! Per-process value cache for the filesystem backend.
//!
//! An entry is served only while its TTL is live **and** the on-disk
//! mtime still matches what was observed at load time, so out-of-band
//! writes from other processes are picked up within one read. Values are
//! cloned on the way in and out; callers never alias cached state.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

struct CacheEntry {
    value: Value,
    loaded_at: Instant,
    mtime_ms: u64,
}

/// TTL + mtime validated value cache.
pub(crate) struct ValueCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    enabled: bool,
}

impl ValueCache {
    pub(crate) fn new(enabled: bool, ttl_ms: u64) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::from_millis(ttl_ms),
            enabled,
        }
    }

    /// Returns the cached value when the entry is live and `mtime_ms`
    /// matches the current on-disk timestamp.
    pub(crate) fn get(&self, key: &str, mtime_ms: u64) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        let entry = self.entries.get(key)?;
        if entry.loaded_at.elapsed() > self.ttl || entry.mtime_ms != mtime_ms {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub(crate) fn put(&self, key: String, value: &Value, mtime_ms: u64) {
        if !self.enabled {
            return;
        }
        self.entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                loaded_at: Instant::now(),
                mtime_ms,
            },
        );
    }

    pub(crate) fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }
}

// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persisted cache of remote query results.
//!
//! Entries are keyed by query key (`products`, `categories`,
//! `products/category/<slug>`) and hold the raw JSON of the last successful
//! fetch plus its wall-clock fetch time. The whole cache is serialized into
//! one blob under the `query_cache` store key after every write, so listings
//! survive a restart.
//!
//! - An entry younger than the stale time is served without fetching.
//! - An older entry is refetched; if the fetch fails and the entry is still
//!   within the max age, the stale data is served instead of the error.
//! - Entries past the max age are dropped on load and never served.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::ApiError;
use crate::security::locks::{resilient_read, resilient_write};
use crate::storage::{delete_logged, keys, set_logged, KeyValueStore};

/// Fresh entries are served without a fetch for this long.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5 * 60);

/// Entries older than this are discarded.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Blob format version. A blob with another version loads as empty.
const CACHE_VERSION: u32 = 1;

/// Query keys.
pub mod query_keys {
    pub const PRODUCTS: &str = "products";
    pub const CATEGORIES: &str = "categories";
    /// Prefix shared by every product listing
    pub const PRODUCT_PREFIX: &str = "products";

    pub fn category(slug: &str) -> String {
        format!("products/category/{}", slug)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    data: serde_json::Value,
    fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    fn age(&self, now: DateTime<Utc>) -> Duration {
        // A fetch time in the future (clock moved back) counts as fresh.
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCache {
    version: u32,
    entries: BTreeMap<String, CacheEntry>,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Fetch failures answered with stale data
    pub stale_served: u64,
    pub entries: usize,
}

/// Remote-data cache persisted in a [`KeyValueStore`].
pub struct QueryCache {
    store: Arc<dyn KeyValueStore>,
    entries: RwLock<BTreeMap<String, CacheEntry>>,
    stale_time: Duration,
    max_age: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_served: AtomicU64,
}

impl QueryCache {
    /// Load the cache from `store` with default freshness settings.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        Self::load_with(store, DEFAULT_STALE_TIME, DEFAULT_MAX_AGE)
    }

    /// Load the cache from `store`.
    ///
    /// A missing or corrupt blob gives an empty cache; expired entries are
    /// dropped.
    pub fn load_with(store: Arc<dyn KeyValueStore>, stale_time: Duration, max_age: Duration) -> Self {
        let now = Utc::now();
        let mut entries = match store.get(keys::QUERY_CACHE) {
            None => BTreeMap::new(),
            Some(blob) => match serde_json::from_str::<PersistedCache>(&blob) {
                Ok(cache) if cache.version == CACHE_VERSION => cache.entries,
                Ok(cache) => {
                    tracing::info!(target: "cache", version = cache.version, "Discarding cache blob from another version");
                    BTreeMap::new()
                }
                Err(e) => {
                    tracing::warn!(target: "cache", "Query cache blob is corrupt, starting empty: {}", e);
                    BTreeMap::new()
                }
            },
        };

        let before = entries.len();
        entries.retain(|_, entry| entry.age(now) <= max_age);
        if entries.len() != before {
            tracing::debug!(target: "cache", dropped = before - entries.len(), "Dropped expired cache entries");
        }

        Self {
            store,
            entries: RwLock::new(entries),
            stale_time,
            max_age,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
        }
    }

    /// Return the cached value for `key`, or fetch, cache and return it.
    pub async fn fetch<T, F, Fut>(&self, key: &str, fetcher: F) -> Result<T, ApiError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let now = Utc::now();
        let cached = resilient_read(&self.entries).get(key).cloned();

        if let Some(entry) = &cached {
            if entry.age(now) <= self.stale_time {
                if let Ok(value) = serde_json::from_value::<T>(entry.data.clone()) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(target: "cache", key, "Cache hit");
                    return Ok(value);
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target: "cache", key, "Cache miss, fetching");

        match fetcher().await {
            Ok(value) => {
                match serde_json::to_value(&value) {
                    Ok(data) => self.put(key, data, Utc::now()),
                    Err(e) => tracing::warn!(target: "cache", key, "Result not cacheable: {}", e),
                }
                Ok(value)
            }
            Err(err) => {
                let fallback = cached
                    .filter(|entry| entry.age(now) <= self.max_age)
                    .and_then(|entry| serde_json::from_value::<T>(entry.data).ok());
                match fallback {
                    Some(value) => {
                        self.stale_served.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(target: "cache", key, "Fetch failed, serving stale data: {}", err);
                        Ok(value)
                    }
                    None => Err(err),
                }
            }
        }
    }

    fn put(&self, key: &str, data: serde_json::Value, fetched_at: DateTime<Utc>) {
        let mut entries = resilient_write(&self.entries);
        entries.insert(key.to_string(), CacheEntry { data, fetched_at });
        self.persist(&entries);
    }

    fn persist(&self, entries: &BTreeMap<String, CacheEntry>) {
        let blob = PersistedCache {
            version: CACHE_VERSION,
            entries: entries.clone(),
        };
        match serde_json::to_string(&blob) {
            Ok(json) => set_logged(self.store.as_ref(), keys::QUERY_CACHE, &json),
            Err(e) => tracing::warn!(target: "cache", "Failed to serialize query cache: {}", e),
        }
    }

    /// Drop the entry for `key`.
    pub fn invalidate(&self, key: &str) {
        let mut entries = resilient_write(&self.entries);
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }

    /// Drop every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) {
        let mut entries = resilient_write(&self.entries);
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        if entries.len() != before {
            tracing::debug!(target: "cache", prefix, removed = before - entries.len(), "Invalidated cache entries");
            self.persist(&entries);
        }
    }

    /// Drop everything, including the persisted blob.
    pub fn clear(&self) {
        resilient_write(&self.entries).clear();
        delete_logged(self.store.as_ref(), keys::QUERY_CACHE);
    }

    pub fn contains(&self, key: &str) -> bool {
        resilient_read(&self.entries).contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            entries: resilient_read(&self.entries).len(),
        }
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("stale_time", &self.stale_time)
            .field("max_age", &self.max_age)
            .field("stats", &self.stats())
            .finish()
    }
}

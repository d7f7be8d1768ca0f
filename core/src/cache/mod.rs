//! Cache-aside orchestration over a pluggable [`CacheStore`].
//!
//! Every cache failure is absorbed here: reads degrade to a miss, writes are logged and
//! dropped, and a store that is not connected turns the service into a pass-through.
//! Only the caller's compute error ever reaches the caller.

pub mod error;
pub mod key;
pub mod sled_store;
pub mod store;

pub use error::{CacheError, CacheResult};
pub use key::{encode_query, generate_key, prefix};
pub use sled_store::SledStore;
pub use store::{CacheStore, LazyStore, MemoryStore, StoreStats};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Spawn the write and return immediately.
    #[default]
    Detached,
    /// Wait for the write before returning.
    Awaited,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    pub write_mode: WriteMode,
}

impl Default for CacheConfig {
    fn default() -> Self { Self { default_ttl: DEFAULT_TTL, write_mode: WriteMode::Detached } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Hit,
    Miss,
    /// Store not connected; the value was computed without touching the cache.
    Bypass,
}

/// Handle on a detached cache write. Dropping it does not cancel the write.
#[derive(Debug)]
pub struct PendingWrite(JoinHandle<CacheResult<()>>);

impl PendingWrite {
    pub async fn wait(self) -> CacheResult<()> {
        self.0.await.map_err(|e| CacheError::Backend(format!("cache write task failed: {e}")))?
    }
}

#[derive(Debug)]
pub struct Cached<T> {
    pub value: T,
    pub source: CacheSource,
    /// Present on a miss in detached mode.
    pub write: Option<PendingWrite>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    bypassed: AtomicU64,
    read_failures: AtomicU64,
    write_failures: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub bypassed: u64,
    pub read_failures: u64,
    pub write_failures: u64,
}

impl CacheCounters {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheReport {
    pub connected: bool,
    pub store: Option<StoreStats>,
    pub counters: CacheCounters,
    pub hit_rate: f64,
}

pub struct CacheService {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    counters: Counters,
}

impl CacheService {
    pub fn new(store: Arc<dyn CacheStore>) -> Self { Self::with_config(store, CacheConfig::default()) }

    pub fn with_config(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self { store, config, counters: Counters::default() }
    }

    pub fn default_ttl(&self) -> Duration { self.config.default_ttl }

    pub fn is_connected(&self) -> bool { self.store.is_connected() }

    /// Read and deserialize a key. Any failure is logged and reported as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.store.is_connected() {
            return None;
        }
        let result = self.store.get(key).and_then(|raw| match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        });
        match result {
            Ok(value) => value,
            Err(err) => {
                self.counters.read_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key, error = %err, "cache get failed");
                None
            }
        }
    }

    /// Serialize and store a value, waiting for completion. Returns whether it was stored.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        if !self.store.is_connected() {
            return false;
        }
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let result = serde_json::to_string(value)
            .map_err(CacheError::from)
            .and_then(|text| self.store.set(key, &text, ttl));
        match result {
            Ok(()) => true,
            Err(err) => {
                self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key, error = %err, "cache set failed");
                false
            }
        }
    }

    pub fn del(&self, key: &str) -> u64 {
        self.absorb("del", key, 0, |s| s.del(key))
    }

    pub fn del_pattern(&self, pattern: &str) -> u64 {
        let deleted = self.absorb("del_pattern", pattern, 0, |s| s.del_pattern(pattern));
        tracing::info!(pattern, deleted, "cache keys deleted by pattern");
        deleted
    }

    pub fn exists(&self, key: &str) -> bool {
        self.absorb("exists", key, false, |s| s.exists(key))
    }

    pub fn counters(&self) -> CacheCounters {
        let c = &self.counters;
        CacheCounters {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            bypassed: c.bypassed.load(Ordering::Relaxed),
            read_failures: c.read_failures.load(Ordering::Relaxed),
            write_failures: c.write_failures.load(Ordering::Relaxed),
        }
    }

    pub fn report(&self) -> CacheReport {
        let connected = self.store.is_connected();
        let store = if connected { self.absorb("stats", "*", None, |s| s.stats().map(Some)) } else { None };
        let counters = self.counters();
        let hit_rate = counters.hit_rate();
        CacheReport { connected, store, counters, hit_rate }
    }

    fn absorb<T>(&self, op: &str, key: &str, fallback: T, f: impl FnOnce(&dyn CacheStore) -> CacheResult<T>) -> T {
        if !self.store.is_connected() {
            tracing::debug!(op, key, "cache not connected; skipping");
            return fallback;
        }
        match f(self.store.as_ref()) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(op, key, error = %err, "cache operation failed");
                fallback
            }
        }
    }

    /// Get-or-compute-and-store. The compute error is returned unchanged and never cached.
    pub async fn wrap<T, E, F, Fut>(&self, key: &str, ttl: Option<Duration>, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.wrap_outcome(key, ttl, compute).await.map(|c| c.value)
    }

    pub async fn wrap_outcome<T, E, F, Fut>(&self, key: &str, ttl: Option<Duration>, compute: F) -> Result<Cached<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.store.is_connected() {
            self.counters.bypassed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, "cache not connected; computing directly");
            let value = compute().await?;
            return Ok(Cached { value, source: CacheSource::Bypass, write: None });
        }

        if let Some(value) = self.get::<T>(key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, "cache hit");
            return Ok(Cached { value, source: CacheSource::Hit, write: None });
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key, "cache miss");
        let value = compute().await?;
        let ttl = ttl.unwrap_or(self.config.default_ttl);

        let write = match self.config.write_mode {
            WriteMode::Awaited => {
                self.set(key, &value, Some(ttl));
                None
            }
            WriteMode::Detached => match serde_json::to_string(&value) {
                Ok(text) => Some(self.spawn_write(key.to_string(), text, ttl)),
                Err(err) => {
                    self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(key, error = %err, "cache value not serializable");
                    None
                }
            },
        };
        Ok(Cached { value, source: CacheSource::Miss, write })
    }

    fn spawn_write(&self, key: String, text: String, ttl: Duration) -> PendingWrite {
        let store = Arc::clone(&self.store);
        let failures = Arc::clone(&self.counters.write_failures);
        PendingWrite(tokio::task::spawn_blocking(move || {
            let result = store.set(&key, &text, ttl);
            if let Err(err) = &result {
                failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %err, "background cache set failed");
            }
            result
        }))
    }
}

use super::error::{CacheError, CacheResult};
use super::store::{check_ttl, key_pattern, CacheStore, StoreStats, SWEEP_EVERY};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    expires_at_ms: u64,
    value: String,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

fn expiry_ms(ttl: Duration) -> CacheResult<u64> {
    u64::try_from(ttl.as_millis())
        .ok()
        .and_then(|ms| now_ms().checked_add(ms))
        .ok_or(CacheError::InvalidTtl)
}

/// Cache store on a local sled database; entries are bincode-encoded with a wall-clock expiry.
pub struct SledStore {
    db: sled::Db,
    writes: AtomicU64,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db, writes: AtomicU64::new(0) })
    }

    pub fn temporary() -> CacheResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db, writes: AtomicU64::new(0) })
    }

    /// Remove `key` only while it still holds `observed`; a concurrent rewrite survives.
    fn evict(&self, key: &str, observed: &[u8]) -> CacheResult<()> {
        // A failed swap means the key was rewritten after it was read.
        let _ = self.db.compare_and_swap(key, Some(observed), None::<sled::IVec>)?;
        Ok(())
    }

    /// Drop every expired entry, returning how many were removed.
    fn sweep_expired(&self) -> CacheResult<u64> {
        let now = now_ms();
        let mut removed = 0u64;
        for item in self.db.iter() {
            let (k, v) = item?;
            let expired = Self::decode(&v).map(|e| e.expires_at_ms <= now).unwrap_or(true);
            if expired && self.db.compare_and_swap(&k, Some(&v), None::<sled::IVec>)?.is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "swept expired sled cache entries");
        }
        Ok(removed)
    }

    fn decode(bytes: &[u8]) -> CacheResult<StoredEntry> { Ok(bincode::deserialize(bytes)?) }

    /// Live entries as (key, entry) pairs; expired ones are skipped.
    fn live_entries(&self, now: u64) -> CacheResult<Vec<(String, StoredEntry)>> {
        let mut out = Vec::new();
        for item in self.db.iter() {
            let (k, v) = item?;
            let entry = Self::decode(&v)?;
            if entry.expires_at_ms > now {
                out.push((String::from_utf8_lossy(&k).into_owned(), entry));
            }
        }
        Ok(out)
    }
}

impl CacheStore for SledStore {
    fn ping(&self) -> CacheResult<()> {
        self.db.contains_key(b"__ping__")?;
        Ok(())
    }

    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let Some(bytes) = self.db.get(key)? else { return Ok(None) };
        let entry = Self::decode(&bytes)?;
        if entry.expires_at_ms > now_ms() {
            return Ok(Some(entry.value));
        }
        self.evict(key, &bytes)?;
        Ok(None)
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        check_ttl(ttl)?;
        let entry = StoredEntry { expires_at_ms: expiry_ms(ttl)?, value: value.to_string() };
        self.db.insert(key, bincode::serialize(&entry)?)?;
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep_expired()?;
        }
        Ok(())
    }

    fn del(&self, key: &str) -> CacheResult<u64> {
        let live = self.get(key)?.is_some();
        self.db.remove(key)?;
        Ok(live as u64)
    }

    fn del_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let pattern = key_pattern(pattern)?;
        let now = now_ms();
        let mut batch = sled::Batch::default();
        let mut deleted = 0u64;
        for item in self.db.iter() {
            let (k, v) = item?;
            if !pattern.matches(&String::from_utf8_lossy(&k)) {
                continue;
            }
            if Self::decode(&v)?.expires_at_ms > now {
                deleted += 1;
            }
            batch.remove(k);
        }
        self.db.apply_batch(batch)?;
        Ok(deleted)
    }

    fn exists(&self, key: &str) -> CacheResult<bool> { Ok(self.get(key)?.is_some()) }

    fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let pattern = key_pattern(pattern)?;
        Ok(self
            .live_entries(now_ms())?
            .into_iter()
            .map(|(k, _)| k)
            .filter(|k| pattern.matches(k))
            .collect())
    }

    fn stats(&self) -> CacheResult<StoreStats> {
        let live = self.live_entries(now_ms())?;
        let bytes = self.db.size_on_disk()?;
        Ok(StoreStats { backend: "sled".into(), keys: live.len(), bytes })
    }
}

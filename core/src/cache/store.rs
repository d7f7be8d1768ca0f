use super::error::{CacheError, CacheResult};
use glob::Pattern;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Writes between sweeps of expired entries.
pub(crate) const SWEEP_EVERY: u64 = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub backend: String,
    pub keys: usize,
    pub bytes: u64,
}

/// Key-value store holding serialized text with a per-entry TTL.
///
/// Expiry is the store's job: an expired key must read as absent, and stores sweep
/// expired entries as they take new writes.
///
/// `del_pattern` and `keys` take Redis `KEYS` patterns: `*`, `?`, `[abc]`, `[^a]`, `[a-z]`
/// and backslash escapes.
pub trait CacheStore: Send + Sync {
    fn is_connected(&self) -> bool { true }
    fn ping(&self) -> CacheResult<()>;
    fn get(&self, key: &str) -> CacheResult<Option<String>>;
    fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;
    fn del(&self, key: &str) -> CacheResult<u64>;
    /// Delete every key matching the pattern in one batch, returning how many were removed.
    fn del_pattern(&self, pattern: &str) -> CacheResult<u64>;
    fn exists(&self, key: &str) -> CacheResult<bool>;
    fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;
    fn stats(&self) -> CacheResult<StoreStats>;
}

pub(crate) fn check_ttl(ttl: Duration) -> CacheResult<()> {
    if ttl.is_zero() { Err(CacheError::InvalidTtl) } else { Ok(()) }
}

/// Compile a Redis `KEYS` pattern into a [`Pattern`].
pub(crate) fn key_pattern(pattern: &str) -> CacheResult<Pattern> {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    let mut in_class = false;
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) if in_class => out.push(escaped),
                Some(escaped) => out.push_str(&Pattern::escape(&escaped.to_string())),
                None => out.push('\\'),
            },
            '[' if !in_class => {
                in_class = true;
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('!');
                }
            }
            ']' if in_class => {
                in_class = false;
                out.push(']');
            }
            '*' if !in_class => {
                out.push('*');
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
            }
            c => out.push(c),
        }
    }
    Ok(Pattern::new(&out)?)
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool { self.expires_at > now }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.write().retain(|_, e| e.is_live(now));
    }

    /// Remove `key` if it is still expired at `now`; a fresh write since then is kept.
    fn evict_expired(&self, key: &str, now: Instant) {
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
    }
}

impl CacheStore for MemoryStore {
    fn ping(&self) -> CacheResult<()> { Ok(()) }

    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(e) if e.is_live(now) => return Ok(Some(e.value.clone())),
                None => return Ok(None),
                Some(_) => {}
            }
        }
        self.evict_expired(key, now);
        Ok(None)
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        check_ttl(ttl)?;
        let expires_at = Instant::now().checked_add(ttl).ok_or(CacheError::InvalidTtl)?;
        let entry = MemoryEntry { value: value.to_string(), expires_at };
        self.entries.write().insert(key.to_string(), entry);
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.purge_expired();
        }
        Ok(())
    }

    fn del(&self, key: &str) -> CacheResult<u64> {
        let now = Instant::now();
        Ok(match self.entries.write().remove(key) {
            Some(e) if e.is_live(now) => 1,
            _ => 0,
        })
    }

    fn del_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let pattern = key_pattern(pattern)?;
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        let mut expired = 0u64;
        entries.retain(|k, e| {
            if !pattern.matches(k) {
                return true;
            }
            if !e.is_live(now) {
                expired += 1;
            }
            false
        });
        Ok((before - entries.len()) as u64 - expired)
    }

    fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let pattern = key_pattern(pattern)?;
        let now = Instant::now();
        let entries = self.entries.read();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| e.is_live(now) && pattern.matches(k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn stats(&self) -> CacheResult<StoreStats> {
        self.purge_expired();
        let entries = self.entries.read();
        let bytes = entries.iter().map(|(k, e)| (k.len() + e.value.len()) as u64).sum();
        Ok(StoreStats { backend: "memory".into(), keys: entries.len(), bytes })
    }
}

/// Process-wide handle that starts disconnected and is connected once the real store is up.
///
/// Every operation fails with [`CacheError::NotConnected`] until [`LazyStore::connect`].
#[derive(Default)]
pub struct LazyStore {
    inner: RwLock<Option<Arc<dyn CacheStore>>>,
}

impl LazyStore {
    pub fn new() -> Self { Self::default() }

    pub fn connect(&self, store: Arc<dyn CacheStore>) {
        *self.inner.write() = Some(store);
        tracing::info!("cache store connected");
    }

    pub fn disconnect(&self) {
        if self.inner.write().take().is_some() {
            tracing::info!("cache store disconnected");
        }
    }

    fn with<T>(&self, f: impl FnOnce(&dyn CacheStore) -> CacheResult<T>) -> CacheResult<T> {
        let inner = self.inner.read().clone();
        match inner {
            Some(store) => f(store.as_ref()),
            None => Err(CacheError::NotConnected),
        }
    }
}

impl CacheStore for LazyStore {
    fn is_connected(&self) -> bool {
        self.inner.read().as_ref().is_some_and(|s| s.is_connected())
    }
    fn ping(&self) -> CacheResult<()> { self.with(|s| s.ping()) }
    fn get(&self, key: &str) -> CacheResult<Option<String>> { self.with(|s| s.get(key)) }
    fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.with(|s| s.set(key, value, ttl))
    }
    fn del(&self, key: &str) -> CacheResult<u64> { self.with(|s| s.del(key)) }
    fn del_pattern(&self, pattern: &str) -> CacheResult<u64> { self.with(|s| s.del_pattern(pattern)) }
    fn exists(&self, key: &str) -> CacheResult<bool> { self.with(|s| s.exists(key)) }
    fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> { self.with(|s| s.keys(pattern)) }
    fn stats(&self) -> CacheResult<StoreStats> { self.with(|s| s.stats()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn set_get_del() {
        let store = MemoryStore::new();
        store.set("paper:1", "{}", TTL).unwrap();
        assert_eq!(store.get("paper:1").unwrap().as_deref(), Some("{}"));
        assert!(store.exists("paper:1").unwrap());
        assert_eq!(store.del("paper:1").unwrap(), 1);
        assert_eq!(store.del("paper:1").unwrap(), 0);
        assert_eq!(store.get("paper:1").unwrap(), None);
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(store.set("k", "v", Duration::ZERO), Err(CacheError::InvalidTtl)));
    }

    #[test]
    fn out_of_range_ttl_is_rejected() {
        let store = MemoryStore::new();
        let res = store.set("k", "v", Duration::from_secs(u64::MAX));
        assert!(matches!(res, Err(CacheError::InvalidTtl)));
        assert!(!store.exists("k").unwrap());
    }

    #[test]
    fn writes_sweep_expired_entries() {
        let store = MemoryStore::new();
        for i in 0..200 {
            store.set(&format!("search:old:{i}"), "v", Duration::from_millis(1)).unwrap();
        }
        std::thread::sleep(Duration::from_millis(20));
        for i in 0..SWEEP_EVERY {
            store.set(&format!("search:new:{i}"), "v", TTL).unwrap();
        }
        let entries = store.entries.read();
        assert_eq!(entries.len(), SWEEP_EVERY as usize);
        assert!(entries.keys().all(|k| k.starts_with("search:new:")));
    }

    #[test]
    fn eviction_keeps_a_fresh_rewrite() {
        let store = MemoryStore::new();
        store.set("paper:1", "old", Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        let observed = Instant::now();
        store.set("paper:1", "new", TTL).unwrap();
        store.evict_expired("paper:1", observed);
        assert_eq!(store.get("paper:1").unwrap().as_deref(), Some("new"));

        store.set("paper:2", "old", Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        store.evict_expired("paper:2", Instant::now());
        assert!(store.entries.read().get("paper:2").is_none());
    }

    #[test]
    fn redis_patterns_are_translated() {
        let negated = key_pattern("search:[^p]*").unwrap();
        assert!(negated.matches("search:articles:x"));
        assert!(!negated.matches("search:papers:x"));

        let doubled = key_pattern("a**b").unwrap();
        assert!(doubled.matches("a:x:b"));

        let escaped = key_pattern(r"stats\*").unwrap();
        assert!(escaped.matches("stats*"));
        assert!(!escaped.matches("stats:papers"));

        let store = MemoryStore::new();
        for key in ["search:papers:a", "search:articles:b"] {
            store.set(key, "v", TTL).unwrap();
        }
        assert_eq!(store.del_pattern("search:[^p]*").unwrap(), 1);
        assert_eq!(store.keys("*").unwrap(), vec!["search:papers:a"]);
    }

    #[test]
    fn entries_expire() {
        let store = MemoryStore::new();
        store.set("short", "v", Duration::from_millis(20)).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(store.get("short").unwrap(), None);
        assert!(!store.exists("short").unwrap());
    }

    #[test]
    fn del_pattern_matches_glob() {
        let store = MemoryStore::new();
        for key in ["search:papers:a", "search:articles:b", "paper:1"] {
            store.set(key, "v", TTL).unwrap();
        }
        assert_eq!(store.keys("search:*").unwrap(), vec!["search:articles:b", "search:papers:a"]);
        assert_eq!(store.del_pattern("search:*").unwrap(), 2);
        assert_eq!(store.keys("*").unwrap(), vec!["paper:1"]);
    }

    #[test]
    fn lazy_store_fails_until_connected() {
        let lazy = LazyStore::new();
        assert!(!lazy.is_connected());
        assert!(matches!(lazy.get("k"), Err(CacheError::NotConnected)));
        lazy.connect(Arc::new(MemoryStore::new()));
        assert!(lazy.is_connected());
        lazy.set("k", "v", TTL).unwrap();
        assert_eq!(lazy.get("k").unwrap().as_deref(), Some("v"));
        lazy.disconnect();
        assert!(matches!(lazy.ping(), Err(CacheError::NotConnected)));
    }
}

//! Shared cache store boundary.
//!
//! The pipeline talks to the store through `CacheStore`: get,
//! set-with-expiry, delete, prefix scan, atomic increment, and a
//! pipelined batch get.
//! Store failures are the implementation's problem — every method
//! degrades to a miss rather than erroring, so a broken store can slow
//! the pipeline down but never fail a request.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> CacheFuture<'_, Option<String>>;

    fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> CacheFuture<'_, ()>;

    /// Returns the number of entries removed.
    fn delete(&self, key: &str) -> CacheFuture<'_, u64>;

    /// All live keys starting with `prefix`.
    fn scan_prefix(&self, prefix: &str) -> CacheFuture<'_, Vec<String>>;

    /// Atomic add; missing or non-numeric entries count as 0. A TTL is
    /// set when the key is created so counters self-evict.
    fn incr(&self, key: &str, by: i64, ttl: Duration) -> CacheFuture<'_, i64>;

    /// Pipelined batch get, one slot per key.
    fn mget(&self, keys: &[String]) -> CacheFuture<'_, Vec<Option<String>>>;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process store: a mutex-guarded map with per-entry expiry.
/// Expired entries are evicted lazily on access.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    fn get_live(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut map = self.entries.lock().expect("cache lock poisoned");
        match map.get(key) {
            Some(e) if e.live(now) => Some(e.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> CacheFuture<'_, Option<String>> {
        let value = self.get_live(key);
        Box::pin(std::future::ready(value))
    }

    fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> CacheFuture<'_, ()> {
        let entry = Entry { value, expires_at: Some(Instant::now() + ttl) };
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .insert(key.to_owned(), entry);
        Box::pin(std::future::ready(()))
    }

    fn delete(&self, key: &str) -> CacheFuture<'_, u64> {
        let removed = self
            .entries
            .lock()
            .expect("cache lock poisoned")
            .remove(key)
            .map(|_| 1)
            .unwrap_or(0);
        Box::pin(std::future::ready(removed))
    }

    fn scan_prefix(&self, prefix: &str) -> CacheFuture<'_, Vec<String>> {
        let now = Instant::now();
        let keys: Vec<String> = self
            .entries
            .lock()
            .expect("cache lock poisoned")
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.live(now))
            .map(|(k, _)| k.clone())
            .collect();
        Box::pin(std::future::ready(keys))
    }

    fn incr(&self, key: &str, by: i64, ttl: Duration) -> CacheFuture<'_, i64> {
        let now = Instant::now();
        let mut map = self.entries.lock().expect("cache lock poisoned");
        let current = match map.get(key) {
            Some(e) if e.live(now) => e.value.parse::<i64>().unwrap_or(0),
            _ => 0,
        };
        let next = current + by;
        let expires_at = match map.get(key) {
            Some(e) if e.live(now) => e.expires_at,
            _ => Some(now + ttl),
        };
        map.insert(key.to_owned(), Entry { value: next.to_string(), expires_at });
        Box::pin(std::future::ready(next))
    }

    fn mget(&self, keys: &[String]) -> CacheFuture<'_, Vec<Option<String>>> {
        let values: Vec<Option<String>> = keys.iter().map(|k| self.get_live(k)).collect();
        Box::pin(std::future::ready(values))
    }
}

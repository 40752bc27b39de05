//! Response cache.
//!
//! # Responsibilities
//! - Store buffered GET 200 responses keyed by method + URI
//! - Expire entries lazily on lookup and eagerly on a periodic sweep
//! - Bound total body bytes, evicting by idle-time/hit-count score
//!
//! # Data Flow
//! ```text
//! set(): cacheable? → reserve bytes (CAS) → evict on failure → retry once
//!        → insert (replacing an old entry releases its bytes)
//!        (retry fails → restore evicted entries → Full)
//! get(): lookup → entry lock { expired? → remove : hits += 1 } → copy
//! ```
//!
//! # Design Decisions
//! - Bucket-level concurrency from DashMap plus a per-entry lock for hit
//!   bookkeeping; no lock is held across I/O
//! - The running byte total is only adjusted on insert and on a removal
//!   that actually took the entry out of the map, so each entry's size is
//!   subtracted exactly once
//! - Eviction ties are broken by map iteration order, which is unspecified
//! - If a concurrent `set` takes the freed bytes before the retry, the
//!   evicted entries are put back and `set` reports `Full`

pub mod entry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use entry::CacheEntry;

pub use entry::BufferedResponse;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("entry of {size} bytes exceeds cache capacity of {max} bytes")]
    EntryTooLarge { size: u64, max: u64 },

    #[error("cache full: cannot store item of size {size}")]
    Full { size: u64 },
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, Arc<CacheEntry>>,
    total_size: AtomicU64,
    /// Zero disables the size bound.
    max_size: u64,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_size: u64) -> Self {
        Self {
            entries: DashMap::new(),
            total_size: AtomicU64::new(0),
            max_size,
            ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl(), config.max_size_bytes)
    }

    pub fn key(method: &Method, uri: &Uri) -> String {
        format!("{}{}", method, uri)
    }

    /// Whether a request/response pair may be stored.
    pub fn is_cacheable(method: &Method, status: StatusCode, headers: &HeaderMap) -> bool {
        method == Method::GET && status == StatusCode::OK && !forbids_store(headers)
    }

    /// Look up a fresh copy of the stored response. Expired entries are
    /// removed and reported as a miss.
    pub fn get(&self, method: &Method, uri: &Uri) -> Option<BufferedResponse> {
        let key = Self::key(method, uri);
        let entry = self.entries.get(&key).map(|e| Arc::clone(e.value()))?;

        match entry.hit(Instant::now()) {
            Some(response) => Some(response),
            None => {
                self.remove_entry(&key, &entry);
                None
            }
        }
    }

    /// Store a response if it is cacheable. Uncacheable pairs are ignored
    /// without error; an error means the entry could not be made to fit.
    pub fn set(&self, method: &Method, uri: &Uri, response: &BufferedResponse) -> Result<(), CacheError> {
        if !Self::is_cacheable(method, response.status, &response.headers) {
            return Ok(());
        }

        let size = response.body.len() as u64;
        if self.max_size > 0 && size > self.max_size {
            return Err(CacheError::EntryTooLarge {
                size,
                max: self.max_size,
            });
        }

        if !self.reserve(size) {
            let evicted = self.evict(size);
            let freed: u64 = evicted.iter().map(|(_, entry)| entry.size).sum();
            tracing::debug!(needed = size, freed, "Cache eviction");
            if !self.reserve(size) {
                self.restore(evicted);
                return Err(CacheError::Full { size });
            }
            metrics::counter!("proxy_cache_evictions_total").increment(evicted.len() as u64);
        }

        let now = Instant::now();
        let entry = Arc::new(CacheEntry::new(response.clone(), now + self.ttl, now));
        if let Some(previous) = self.entries.insert(Self::key(method, uri), entry) {
            self.total_size.fetch_sub(previous.size, Ordering::AcqRel);
        }
        self.publish();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the body sizes of all live entries.
    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::Acquire)
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(String, Arc<CacheEntry>)> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let removed = expired
            .iter()
            .filter(|(key, entry)| self.remove_entry(key, entry))
            .count();
        if removed > 0 {
            self.publish();
        }
        removed
    }

    pub fn clear(&self) {
        let keys: Vec<(String, Arc<CacheEntry>)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        for (key, entry) in &keys {
            self.remove_entry(key, entry);
        }
        self.publish();
    }

    /// Run `remove_expired` every `interval` until cancelled or until the
    /// cache is dropped.
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(maintenance_loop(cache, interval, cancel))
    }

    /// Try to add `size` bytes to the running total without exceeding the
    /// bound.
    fn reserve(&self, size: u64) -> bool {
        if self.max_size == 0 {
            self.total_size.fetch_add(size, Ordering::AcqRel);
            return true;
        }
        self.total_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(size).filter(|next| *next <= self.max_size)
            })
            .is_ok()
    }

    /// Evict the highest-scoring entries until at least `needed` bytes are
    /// freed or nothing is left. Returns what was taken out.
    fn evict(&self, needed: u64) -> Vec<(String, Arc<CacheEntry>)> {
        let now = Instant::now();
        let mut candidates: Vec<(f64, String, Arc<CacheEntry>)> = self
            .entries
            .iter()
            .map(|e| (e.value().eviction_score(now), e.key().clone(), Arc::clone(e.value())))
            .collect();
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut freed = 0;
        let mut evicted = Vec::new();
        for (_, key, entry) in candidates {
            if freed >= needed {
                break;
            }
            if self.remove_entry(&key, &entry) {
                freed += entry.size;
                evicted.push((key, entry));
            }
        }
        evicted
    }

    /// Put back entries taken out by a failed eviction. A key that was
    /// written again in the meantime keeps the newer entry, and an entry
    /// whose bytes no longer fit stays out.
    fn restore(&self, evicted: Vec<(String, Arc<CacheEntry>)>) {
        for (key, entry) in evicted {
            if !self.reserve(entry.size) {
                continue;
            }
            match self.entries.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
                Entry::Occupied(_) => {
                    self.total_size.fetch_sub(entry.size, Ordering::AcqRel);
                }
            }
        }
    }

    /// Remove `key` only if it still maps to `entry`. Returns whether this
    /// call removed it.
    fn remove_entry(&self, key: &str, entry: &Arc<CacheEntry>) -> bool {
        let removed = self
            .entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, entry))
            .is_some();
        if removed {
            self.total_size.fetch_sub(entry.size, Ordering::AcqRel);
        }
        removed
    }

    fn publish(&self) {
        metrics::gauge!("proxy_cache_bytes").set(self.total_size() as f64);
        metrics::gauge!("proxy_cache_entries").set(self.len() as f64);
    }
}

fn forbids_store(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|directive| directive.trim().eq_ignore_ascii_case("no-store"))
}

async fn maintenance_loop(cache: Weak<ResponseCache>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(cache) = cache.upgrade() else { break };
                let removed = cache.remove_expired();
                if removed > 0 {
                    tracing::debug!(removed, total_size = cache.total_size(), "Expired cache entries swept");
                }
            }
        }
    }
    tracing::debug!("Cache maintenance stopped");
}

//! In-memory expiring order cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use domain::{CacheError, Order, OrderCache, cache_key};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Minimum time between sweeps of expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, CacheEntry>,
    last_sweep: Option<Instant>,
}

impl Entries {
    /// Drops expired entries, at most once per [`SWEEP_INTERVAL`].
    fn sweep(&mut self, now: Instant) {
        if self
            .last_sweep
            .is_some_and(|last| now.duration_since(last) < SWEEP_INTERVAL)
        {
            return;
        }
        self.last_sweep = Some(now);
        let before = self.map.len();
        self.map.retain(|_, entry| entry.expires_at > now);
        let purged = before - self.map.len();
        if purged > 0 {
            tracing::debug!(purged, remaining = self.map.len(), "purged expired cache entries");
        }
    }
}

/// Key-value cache holding orders as JSON under `order_<id>`.
///
/// Expired entries are dropped when read and swept periodically on write,
/// so entries that are never read again do not accumulate.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderCache {
    entries: Arc<Mutex<Entries>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryOrderCache {
    /// Creates a new, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail with [`CacheError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the time left before the entry for `id` expires.
    pub fn ttl_remaining(&self, id: OrderId) -> Option<Duration> {
        let entries = self.entries.lock();
        let entry = entries.map.get(&cache_key(id))?;
        entry.expires_at.checked_duration_since(Instant::now())
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_available(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("cache is down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderCache for InMemoryOrderCache {
    async fn get(&self, id: OrderId) -> Result<Option<Order>, CacheError> {
        self.ensure_available()?;
        let key = cache_key(id);
        let mut guard = self.entries.lock();
        let entries = &mut guard.map;
        let expired = match entries.get(&key) {
            None => return Ok(None),
            Some(entry) => entry.expires_at <= Instant::now(),
        };
        if expired {
            entries.remove(&key);
            return Ok(None);
        }
        match entries.get(&key) {
            Some(entry) => Ok(Some(serde_json::from_str(&entry.value)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, order: &Order, ttl: Duration) -> Result<(), CacheError> {
        self.ensure_available()?;
        let value = serde_json::to_string(order)?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.sweep(now);
        entries.map.insert(
            cache_key(order.id),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }
}

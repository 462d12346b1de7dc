use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Clone, Debug)]
struct Entry<V> {
    value: V,
    stored_at: Instant,
}

type Slot<V> = Arc<Mutex<Option<Entry<V>>>>;

/// Memoizes fallible async lookups per key for a fixed time-to-live.
///
/// Each key owns an async lock held for the whole upstream call, so concurrent
/// callers for the same key wait for the first one and reuse its value instead
/// of issuing their own request. Failures are not cached. Expired slots
/// nobody is using are swept on a miss, at most once per `ttl`.
pub struct TtlCache<K, V> {
    ttl: Duration,
    slots: DashMap<K, Slot<V>>,
    last_sweep: SyncMutex<Instant>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: DashMap::new(),
            last_sweep: SyncMutex::new(Instant::now()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn slot(&self, key: &K) -> Slot<V> {
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .value()
            .clone()
    }

    /// Returns the live value for `key`, running `fetch` when there is none.
    pub async fn get_or_try_fetch<F, Fut, E>(&self, key: &K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        if let Some(entry) = guard.as_ref()
            && entry.stored_at.elapsed() < self.ttl
        {
            return Ok(entry.value.clone());
        }

        self.sweep();
        let value = fetch().await?;
        *guard = Some(Entry {
            value: value.clone(),
            stored_at: Instant::now(),
        });
        Ok(value)
    }

    fn sweep(&self) {
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            if last.elapsed() < self.ttl {
                return;
            }
            *last = Instant::now();
        }
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            // Another handle means a caller is about to lock or holds the slot.
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(guard) => guard
                    .as_ref()
                    .is_some_and(|entry| entry.stored_at.elapsed() < self.ttl),
                Err(_) => true,
            }
        });
        let swept = before.saturating_sub(self.slots.len());
        if swept > 0 {
            tracing::debug!(swept, remaining = self.slots.len(), "swept expired cache slots");
        }
    }

    /// Cached value for `key` if it has not expired.
    pub async fn peek(&self, key: &K) -> Option<V> {
        let slot = self.slots.get(key).map(|entry| entry.value().clone())?;
        let guard = slot.lock().await;
        guard
            .as_ref()
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    pub fn invalidate(&self, key: &K) {
        self.slots.remove(key);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

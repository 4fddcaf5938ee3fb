//! Read-through TTL cache shared by concurrent requests.

use dashmap::DashMap;
use edgegate_api::Clock;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Cached<V> {
    exp_at_ms: u128,
    value: V,
}

/// Concurrent key/value store whose entries expire `ttl` after insertion.
///
/// Concurrent misses on the same key may each populate it; the last insert
/// wins. Inserts sweep expired entries at most once per `ttl`, so nothing
/// stays in the map longer than two windows.
pub struct TtlCache<K, V> {
    entries: DashMap<K, Cached<V>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    next_sweep_ms: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
            next_sweep_ms: AtomicU64::new(0),
        }
    }

    /// Unexpired value for `key`. Expired entries are dropped on the way.
    pub fn get(&self, key: &K) -> Option<V> {
        let now_ms = self.clock.now_ms();
        if let Some(cached) = self.entries.get(key) {
            if cached.exp_at_ms > now_ms {
                return Some(cached.value.clone());
            }
        }
        self.entries.remove_if(key, |_, cached| cached.exp_at_ms <= now_ms);
        None
    }

    pub fn insert(&self, key: K, value: V) {
        let now_ms = self.clock.now_ms();
        self.sweep_if_due(now_ms);
        let exp_at_ms = now_ms + self.ttl.as_millis();
        self.entries.insert(key, Cached { exp_at_ms, value });
    }

    fn sweep_if_due(&self, now_ms: u128) {
        let now = u64::try_from(now_ms).unwrap_or(u64::MAX);
        let due = self.next_sweep_ms.load(Ordering::Acquire);
        if now < due {
            return;
        }
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        let next = now.saturating_add(ttl_ms);
        // One caller wins the sweep; the rest carry on inserting.
        if self
            .next_sweep_ms
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let removed = self.purge_expired();
            if removed > 0 {
                tracing::trace!(removed, "swept expired cache entries");
            }
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now_ms = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, cached| cached.exp_at_ms > now_ms);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Two-tier key/value cache exploiting one-way immutability.
//!
//! Most lookups target a small set of rounds near the current chain
//! position that eventually transition to permanently executed. Re-fetching
//! an executed round forever would be wasted work, so values a
//! caller-supplied predicate marks as terminal are promoted into a
//! permanent tier and served without expiry from then on. Everything else
//! lives in a bounded TTL tier with insertion-order eviction.

use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    hash::Hash,
    time::Duration,
};
use tokio::time::Instant;

struct TtlEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

/// Counters and sizes of one [`TieredCache`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from either tier.
    pub hits: u64,
    /// Lookups that found nothing valid.
    pub misses: u64,
    /// Values moved into the permanent tier.
    pub promotions: u64,
    /// Current permanent tier size.
    pub permanent_entries: usize,
    /// Current TTL tier size.
    pub ttl_entries: usize,
}

/// Key/value cache with a permanent tier for proven-immutable values and
/// a TTL tier for everything else.
pub struct TieredCache<K, V> {
    permanent: HashMap<K, V>,
    ttl: HashMap<K, TtlEntry<V>>,
    // Insertion order of the TTL tier; stale keys are skipped on pop.
    order: VecDeque<K>,
    capacity: usize,
    is_terminal: fn(&V) -> bool,
    hits: u64,
    misses: u64,
    promotions: u64,
}

impl<K, V> TieredCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache whose TTL tier holds at most `capacity` entries.
    /// `is_terminal` decides which values are immutable and belong in the
    /// permanent tier.
    pub fn new(capacity: usize, is_terminal: fn(&V) -> bool) -> Self {
        Self {
            permanent: HashMap::new(),
            ttl: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            is_terminal,
            hits: 0,
            misses: 0,
            promotions: 0,
        }
    }

    /// Look up `key`. A permanent hit is always valid; a TTL hit is valid
    /// while `now - inserted_at <= ttl` (the boundary instant still hits)
    /// and is evicted the moment it is seen expired.
    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_if(key, |_| true)
    }

    /// Look up `key` with an extra validity check on the TTL tier. A live
    /// entry failing `valid` counts as a miss and is evicted, exactly like
    /// an expired one. Permanent-tier values skip the check: the terminal
    /// predicate already proved them immutable.
    pub fn get_if(&mut self, key: &K, valid: impl FnOnce(&V) -> bool) -> Option<V> {
        if let Some(value) = self.permanent.get(key) {
            self.hits = self.hits.saturating_add(1);
            return Some(value.clone());
        }
        if let Some(entry) = self.ttl.get(key) {
            if entry.inserted_at.elapsed() <= entry.ttl && valid(&entry.value) {
                self.hits = self.hits.saturating_add(1);
                return Some(entry.value.clone());
            }
            self.ttl.remove(key);
            self.order.retain(|k| k != key);
        }
        self.misses = self.misses.saturating_add(1);
        None
    }

    /// Insert `value` under `key`. Terminal values go to the permanent
    /// tier (a promotion) and shadow any TTL entry for the key; other
    /// values go to the TTL tier with the given `ttl`.
    pub fn set(&mut self, key: K, value: V, ttl: Duration) {
        if (self.is_terminal)(&value) {
            if self.ttl.remove(&key).is_some() {
                self.order.retain(|k| *k != key);
            }
            self.permanent.insert(key, value);
            self.promotions = self.promotions.saturating_add(1);
            return;
        }

        // A terminal value never goes back to being volatile; keep the
        // permanent entry authoritative.
        if self.permanent.contains_key(&key) {
            return;
        }

        let entry = TtlEntry {
            value,
            inserted_at: Instant::now(),
            ttl,
        };
        if self.ttl.insert(key.clone(), entry).is_none() {
            if self.ttl.len() > self.capacity {
                self.evict_oldest();
            }
            self.order.push_back(key);
        }
    }

    /// Drop `key` from both tiers.
    pub fn delete(&mut self, key: &K) {
        self.permanent.remove(key);
        if self.ttl.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }

    /// Drop everything from both tiers. Counters are kept.
    pub fn clear(&mut self) {
        self.permanent.clear();
        self.ttl.clear();
        self.order.clear();
    }

    /// Snapshot of counters and per-tier sizes.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            promotions: self.promotions,
            permanent_entries: self.permanent.len(),
            ttl_entries: self.ttl.len(),
        }
    }

    // Oldest-inserted eviction, not LRU: reads never reorder entries.
    fn evict_oldest(&mut self) {
        while let Some(oldest) = self.order.pop_front() {
            if self.ttl.remove(&oldest).is_some() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TTL: Duration = Duration::from_secs(10);

    fn cache() -> TieredCache<u64, (u64, bool)> {
        // Value = (payload, terminal flag).
        TieredCache::new(3, |v: &(u64, bool)| v.1)
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_entry_hits_at_the_boundary_and_misses_past_it() {
        let mut c = cache();
        c.set(1, (7, false), TTL);

        tokio::time::advance(TTL).await;
        assert_eq!(c.get(&1), Some((7, false)), "boundary == ttl must hit");

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(c.get(&1), None);
        // The expired entry is gone, not just invisible.
        assert_eq!(c.stats().ttl_entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_values_never_expire() {
        let mut c = cache();
        c.set(1, (7, true), TTL);

        tokio::time::advance(TTL * 1000).await;
        assert_eq!(c.get(&1), Some((7, true)));
        let stats = c.stats();
        assert_eq!(stats.promotions, 1);
        assert_eq!(stats.permanent_entries, 1);
        assert_eq!(stats.ttl_entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn promotion_drops_the_ttl_entry_for_the_key() {
        let mut c = cache();
        c.set(1, (7, false), TTL);
        c.set(1, (8, true), TTL);

        let stats = c.stats();
        assert_eq!(stats.ttl_entries, 0);
        assert_eq!(stats.permanent_entries, 1);
        assert_eq!(c.get(&1), Some((8, true)));
    }

    #[tokio::test(start_paused = true)]
    async fn a_promoted_key_ignores_later_volatile_writes() {
        let mut c = cache();
        c.set(1, (8, true), TTL);
        c.set(1, (9, false), TTL);
        assert_eq!(c.get(&1), Some((8, true)));
    }

    #[tokio::test(start_paused = true)]
    async fn full_ttl_tier_evicts_the_oldest_inserted_entry() {
        let mut c = cache();
        c.set(1, (1, false), TTL);
        c.set(2, (2, false), TTL);
        c.set(3, (3, false), TTL);

        // Reading key 1 must not save it: eviction is insertion-order.
        assert_eq!(c.get(&1), Some((1, false)));

        c.set(4, (4, false), TTL);
        assert_eq!(c.stats().ttl_entries, 3);
        assert_eq!(c.get(&1), None);
        assert_eq!(c.get(&2), Some((2, false)));
        assert_eq!(c.get(&4), Some((4, false)));
    }

    #[tokio::test(start_paused = true)]
    async fn updating_an_existing_key_does_not_evict() {
        let mut c = cache();
        c.set(1, (1, false), TTL);
        c.set(2, (2, false), TTL);
        c.set(3, (3, false), TTL);
        c.set(2, (20, false), TTL);

        assert_eq!(c.stats().ttl_entries, 3);
        assert_eq!(c.get(&1), Some((1, false)));
        assert_eq!(c.get(&2), Some((20, false)));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_and_clear_cover_both_tiers() {
        let mut c = cache();
        c.set(1, (1, false), TTL);
        c.set(2, (2, true), TTL);

        c.delete(&1);
        c.delete(&2);
        assert_eq!(c.get(&1), None);
        assert_eq!(c.get(&2), None);

        c.set(3, (3, false), TTL);
        c.set(4, (4, true), TTL);
        c.clear();
        let stats = c.stats();
        assert_eq!(stats.permanent_entries, 0);
        assert_eq!(stats.ttl_entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn an_invalid_value_counts_as_a_miss_and_is_evicted() {
        let mut c = cache();
        c.set(1, (7, false), TTL);
        assert_eq!(c.get_if(&1, |v| v.0 == 9), None);
        let stats = c.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.ttl_entries, 0, "the invalid entry is evicted");

        // Permanent-tier values skip the validity check.
        c.set(2, (8, true), TTL);
        assert_eq!(c.get_if(&2, |v| v.0 == 9), Some((8, true)));
        assert_eq!(c.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn counters_track_hits_and_misses() {
        let mut c = cache();
        assert_eq!(c.get(&1), None);
        c.set(1, (1, false), TTL);
        assert_eq!(c.get(&1), Some((1, false)));
        assert_eq!(c.get(&1), Some((1, false)));

        let stats = c.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }
}

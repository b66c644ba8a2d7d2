use std::time::Instant;

use lru::LruCache;
use tracing::trace;

use crate::entry::{CacheEntry, Tier};
use crate::eviction::{EvictionContext, EvictionPolicy};
use crate::stats::TierStats;

/// One bounded cache level. Callers hold it behind its own mutex.
///
/// Entries live in an unbounded [`LruCache`] so the recency order is always
/// available; the capacity bound is enforced here against the tier's policy.
pub struct CacheTier {
    tier: Tier,
    entries: LruCache<String, CacheEntry>,
    capacity: usize,
    policy: Box<dyn EvictionPolicy>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl CacheTier {
    pub fn new(tier: Tier, capacity: usize, policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            tier,
            entries: LruCache::unbounded(),
            capacity,
            policy,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counted lookup. An expired copy is removed and reported as a miss.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<CacheEntry> {
        let expired = match self.entries.peek(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                self.misses += 1;
                return None;
            }
        };
        if expired {
            self.entries.pop(key);
            self.expirations += 1;
            self.misses += 1;
            trace!(tier = %self.tier, key, "expired on read");
            return None;
        }

        let entry = self.entries.get_mut(key)?;
        entry.touch(now);
        self.hits += 1;
        Some(entry.clone())
    }

    /// Uncounted lookup that leaves recency untouched.
    pub fn peek(&self, key: &str, now: Instant) -> Option<&CacheEntry> {
        self.entries.peek(key).filter(|entry| !entry.is_expired(now))
    }

    /// Insert or overwrite `entry`, evicting first if a new key would overflow.
    /// Returns the number of entries removed to make room.
    pub fn insert(&mut self, entry: CacheEntry, now: Instant) -> usize {
        let mut removed = 0;
        if !self.entries.contains(&entry.key) {
            while self.entries.len() >= self.capacity {
                let freed = self.make_room(now);
                if freed == 0 {
                    break;
                }
                removed += freed;
            }
        }
        self.entries.put(entry.key.clone(), entry);
        removed
    }

    fn make_room(&mut self, now: Instant) -> usize {
        if self.policy.prefers_recency() {
            return match self.entries.pop_lru() {
                Some((key, _)) => {
                    self.evictions += 1;
                    trace!(tier = %self.tier, key, policy = self.policy.name(), "evicted");
                    1
                }
                None => 0,
            };
        }

        let ctx = EvictionContext {
            now,
            len: self.entries.len(),
            capacity: self.capacity,
        };

        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| self.policy.should_evict(entry, &ctx))
            .map(|(key, _)| key.clone())
            .collect();
        if !doomed.is_empty() {
            for key in &doomed {
                self.entries.pop(key);
            }
            self.expirations += doomed.len() as u64;
            return doomed.len();
        }

        let victim = self
            .entries
            .iter()
            .map(|(key, entry)| (key, self.policy.priority(entry, &ctx)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(key, _)| key.clone());
        match victim {
            Some(key) => {
                self.entries.pop(&key);
                self.evictions += 1;
                trace!(tier = %self.tier, key, policy = self.policy.name(), "evicted");
                1
            }
            None => 0,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.pop(key)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        self.expirations += expired.len() as u64;
        expired.len()
    }

    /// Remove every entry matching `pred`, returning the removed entries.
    pub fn remove_where<F>(&mut self, mut pred: F) -> Vec<CacheEntry>
    where
        F: FnMut(&CacheEntry) -> bool,
    {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| pred(entry))
            .map(|(key, _)| key.clone())
            .collect();
        keys.iter().filter_map(|key| self.entries.pop(key)).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.iter().map(|(_, entry)| entry)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> TierStats {
        TierStats {
            tier: self.tier,
            policy: self.policy.name(),
            entries: self.entries.len(),
            capacity: self.capacity,
            bytes: self.entries.iter().map(|(_, e)| e.size).sum(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
        }
    }
}

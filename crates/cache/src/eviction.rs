//! Tier-specific eviction scoring.
//!
//! A tier asks its policy two things when it overflows: which entries are
//! worth dropping outright, and, failing that, which entry scores lowest.

use std::time::Instant;

use crate::entry::CacheEntry;

/// Tier occupancy handed to a policy while it scores entries.
#[derive(Debug, Clone, Copy)]
pub struct EvictionContext {
    pub now: Instant,
    pub len: usize,
    pub capacity: usize,
}

impl EvictionContext {
    pub fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.len as f64 / self.capacity as f64
    }
}

pub trait EvictionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `entry` may be dropped right away.
    fn should_evict(&self, entry: &CacheEntry, ctx: &EvictionContext) -> bool;

    /// Retention score; the lowest-scoring entry is evicted first.
    fn priority(&self, entry: &CacheEntry, ctx: &EvictionContext) -> f64;

    /// When true the tier evicts its least recently used entry without scoring.
    fn prefers_recency(&self) -> bool {
        false
    }
}

/// Strict least-recently-used. Used by the hot tier.
#[derive(Debug, Default, Clone, Copy)]
pub struct LruPolicy;

impl EvictionPolicy for LruPolicy {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn should_evict(&self, entry: &CacheEntry, ctx: &EvictionContext) -> bool {
        entry.is_expired(ctx.now)
    }

    fn priority(&self, entry: &CacheEntry, ctx: &EvictionContext) -> f64 {
        -entry.idle(ctx.now).as_secs_f64()
    }

    fn prefers_recency(&self) -> bool {
        true
    }
}

/// Blend of access frequency and remaining ttl. Used by the warm tier.
#[derive(Debug, Clone, Copy)]
pub struct FrequencyTtlPolicy {
    /// Share of the score taken by frequency; the rest is remaining ttl.
    pub frequency_weight: f64,
}

impl Default for FrequencyTtlPolicy {
    fn default() -> Self {
        Self { frequency_weight: 0.5 }
    }
}

impl EvictionPolicy for FrequencyTtlPolicy {
    fn name(&self) -> &'static str {
        "frequency_ttl"
    }

    fn should_evict(&self, entry: &CacheEntry, ctx: &EvictionContext) -> bool {
        entry.is_expired(ctx.now)
    }

    fn priority(&self, entry: &CacheEntry, ctx: &EvictionContext) -> f64 {
        let idle = entry.idle(ctx.now).as_secs_f64();
        // Accesses per idle second, squashed into [0, 1).
        let rate = entry.access_count as f64 / (1.0 + idle);
        let frequency = rate / (1.0 + rate);

        let remaining = if entry.ttl.is_zero() {
            0.0
        } else {
            entry.remaining_ttl(ctx.now).as_secs_f64() / entry.ttl.as_secs_f64()
        };

        self.frequency_weight * frequency + (1.0 - self.frequency_weight) * remaining
    }
}

/// Pure time-to-live: whatever expires soonest goes first. Used by the cold tier.
#[derive(Debug, Default, Clone, Copy)]
pub struct TtlPolicy;

impl EvictionPolicy for TtlPolicy {
    fn name(&self) -> &'static str {
        "ttl"
    }

    fn should_evict(&self, entry: &CacheEntry, ctx: &EvictionContext) -> bool {
        entry.is_expired(ctx.now)
    }

    fn priority(&self, entry: &CacheEntry, ctx: &EvictionContext) -> f64 {
        entry.remaining_ttl(ctx.now).as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use undertow_core::{Payload, WorkCategory};

    use super::*;
    use crate::entry::Tier;

    fn entry(key: &str, ttl_ms: u64, now: Instant) -> CacheEntry {
        CacheEntry::new(key, Payload::Empty, WorkCategory::Analysis, Tier::Warm, Duration::from_millis(ttl_ms), now)
    }

    fn ctx(now: Instant) -> EvictionContext {
        EvictionContext { now, len: 4, capacity: 4 }
    }

    #[test]
    fn lru_scores_older_access_lower() {
        let t0 = Instant::now();
        let mut recent = entry("a", 1_000, t0);
        let stale = entry("b", 1_000, t0);
        recent.touch(t0 + Duration::from_millis(50));
        let c = ctx(t0 + Duration::from_millis(60));

        let policy = LruPolicy;
        assert!(policy.prefers_recency());
        assert!(policy.priority(&stale, &c) < policy.priority(&recent, &c));
    }

    #[test]
    fn frequency_ttl_keeps_busy_entries() {
        let t0 = Instant::now();
        let mut busy = entry("busy", 1_000, t0);
        for i in 0..10 {
            busy.touch(t0 + Duration::from_millis(i));
        }
        let idle = entry("idle", 1_000, t0);
        let c = ctx(t0 + Duration::from_millis(20));

        let policy = FrequencyTtlPolicy::default();
        assert!(!policy.prefers_recency());
        assert!(policy.priority(&idle, &c) < policy.priority(&busy, &c));
    }

    #[test]
    fn ttl_policy_evicts_soonest_expiring_first() {
        let t0 = Instant::now();
        let short = entry("short", 100, t0);
        let long = entry("long", 10_000, t0);
        let c = ctx(t0 + Duration::from_millis(10));
        assert!(TtlPolicy.priority(&short, &c) < TtlPolicy.priority(&long, &c));
    }

    #[test]
    fn expired_entries_are_evictable() {
        let t0 = Instant::now();
        let e = entry("e", 10, t0);
        let later = ctx(t0 + Duration::from_millis(11));
        assert!(LruPolicy.should_evict(&e, &later));
        assert!(FrequencyTtlPolicy::default().should_evict(&e, &later));
        assert!(TtlPolicy.should_evict(&e, &later));
        assert!(!TtlPolicy.should_evict(&e, &ctx(t0)));
        assert_eq!(later.fill_ratio(), 1.0);
    }
}

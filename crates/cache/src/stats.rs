use serde::Serialize;

use crate::entry::Tier;

/// Counters and occupancy of one tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStats {
    pub tier: Tier,
    pub policy: &'static str,
    pub entries: usize,
    pub capacity: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl TierStats {
    pub fn hit_ratio(&self) -> f64 {
        ratio(self.hits, self.hits + self.misses)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub tiers: Vec<TierStats>,
    /// `get` calls across the whole hierarchy.
    pub lookups: u64,
    /// Lookups answered by any tier.
    pub hits: u64,
    pub hit_ratio: f64,
    pub prefetch_submitted: u64,
    pub prefetch_skipped: u64,
    pub invalidated: u64,
    pub invalidation_events_dropped: u64,
    pub tracked_keys: usize,
}

impl CacheStats {
    pub fn tier(&self, tier: Tier) -> Option<&TierStats> {
        self.tiers.iter().find(|t| t.tier == tier)
    }

    pub fn misses(&self) -> u64 {
        self.lookups - self.hits
    }
}

pub(crate) fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

//! Aggregate pipeline stats and the bounded history of periodic snapshots.

use std::collections::VecDeque;

use serde::Serialize;
use undertow_broadcast::BroadcastStats;
use undertow_cache::{CacheStats, Tier};
use undertow_dispatch::PoolStats;

// ── History ──────────────────────────────────────────────────────────

/// The most recent stats points, oldest first.
///
/// Holds at most `capacity` points; a zero capacity records nothing.
#[derive(Debug, Clone)]
pub struct History<T> {
    points: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> History<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, point: T) {
        if self.capacity == 0 {
            return;
        }
        while self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn latest(&self) -> Option<&T> {
        self.points.back()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.points.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// ── Counters owned by the routers ────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RouterStats {
    /// Work results turned into updates.
    pub results_routed: u64,
    /// Successful results written into the cache.
    pub results_cached: u64,
    /// Invalidation events turned into updates.
    pub invalidations_routed: u64,
    /// Updates the broadcaster refused because it had shut down.
    pub publish_rejected: u64,
}

// ── Full stats ───────────────────────────────────────────────────────

/// Everything observable about a running pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub uptime_secs: f64,
    pub pool: PoolStats,
    pub cache: CacheStats,
    pub broadcast: BroadcastStats,
    pub routing: RouterStats,
}

impl PipelineStats {
    /// Fraction of cache lookups answered by any tier.
    pub fn cache_hit_ratio(&self) -> f64 {
        self.cache.hit_ratio
    }

    /// Hit ratio of a single tier.
    pub fn tier_hit_ratio(&self, tier: Tier) -> f64 {
        self.cache.tier(tier).map(|t| t.hit_ratio()).unwrap_or(0.0)
    }

    pub fn dropped_updates(&self) -> u64 {
        self.broadcast.dropped()
    }

    pub fn active_subscribers(&self) -> usize {
        self.broadcast.active_subscribers
    }
}

// ── Time-series snapshot ─────────────────────────────────────────────

/// A point-in-time summary kept in the pipeline's [`History`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsPoint {
    /// Seconds since the pipeline started.
    pub elapsed_secs: f64,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub queue_depth: usize,
    pub in_flight: u64,
    pub cache_hit_ratio: f64,
    pub hot_hit_ratio: f64,
    pub updates_delivered: u64,
    pub updates_dropped: u64,
    pub active_subscribers: usize,
}

impl From<&PipelineStats> for StatsPoint {
    fn from(stats: &PipelineStats) -> Self {
        Self {
            elapsed_secs: stats.uptime_secs,
            submitted: stats.pool.submitted,
            completed: stats.pool.completed,
            failed: stats.pool.failed,
            queue_depth: stats.pool.queue_depth,
            in_flight: stats.pool.in_flight,
            cache_hit_ratio: stats.cache_hit_ratio(),
            hot_hit_ratio: stats.tier_hit_ratio(Tier::Hot),
            updates_delivered: stats.broadcast.delivered,
            updates_dropped: stats.dropped_updates(),
            active_subscribers: stats.active_subscribers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_keeps_newest_points() {
        let mut history = History::new(3);
        for i in 0..5 {
            history.record(i);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.to_vec(), vec![2, 3, 4]);
        assert_eq!(history.latest(), Some(&4));
    }

    #[test]
    fn zero_capacity_history_records_nothing() {
        let mut history = History::new(0);
        history.record("x");
        assert!(history.is_empty());
        assert!(history.latest().is_none());
    }
}

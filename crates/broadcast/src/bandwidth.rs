//! Adaptive split of the broadcast admission budget across categories.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;
use undertow_core::sync::lock;
use undertow_core::WorkCategory;

#[derive(Debug)]
struct BandwidthState {
    /// EMA of observed publishes per second.
    demand: HashMap<WorkCategory, f64>,
    /// Publishes since the last recalculation.
    window: HashMap<WorkCategory, u64>,
    allocation: HashMap<WorkCategory, f64>,
    last_recalc: Instant,
}

/// Divides a total updates/sec budget between categories in proportion to
/// recent demand, with a guaranteed minimum share per category.
#[derive(Debug)]
pub struct BandwidthManager {
    total: f64,
    min_share: f64,
    decay: f64,
    state: Mutex<BandwidthState>,
}

impl BandwidthManager {
    /// Starts with an even split.
    pub fn new(total: f64, min_share: f64, decay: f64) -> Self {
        let even = total / WorkCategory::ALL.len() as f64;
        Self {
            total,
            min_share,
            decay,
            state: Mutex::new(BandwidthState {
                demand: HashMap::new(),
                window: HashMap::new(),
                allocation: WorkCategory::ALL.into_iter().map(|c| (c, even)).collect(),
                last_recalc: Instant::now(),
            }),
        }
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn record_demand(&self, category: WorkCategory) {
        *lock(&self.state).window.entry(category).or_default() += 1;
    }

    /// Current budget for `category` in updates per second.
    pub fn allocation(&self, category: WorkCategory) -> f64 {
        lock(&self.state).allocation.get(&category).copied().unwrap_or(0.0)
    }

    pub fn allocations(&self) -> HashMap<WorkCategory, f64> {
        lock(&self.state).allocation.clone()
    }

    pub fn demand(&self, category: WorkCategory) -> f64 {
        lock(&self.state).demand.get(&category).copied().unwrap_or(0.0)
    }

    pub fn recalculate(&self) {
        self.recalculate_at(Instant::now());
    }

    /// Fold the current window into the demand EMA and reallocate.
    pub fn recalculate_at(&self, now: Instant) {
        let mut state = lock(&self.state);
        let elapsed = now.saturating_duration_since(state.last_recalc).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }

        for category in WorkCategory::ALL {
            let observed = state.window.get(&category).copied().unwrap_or(0) as f64 / elapsed;
            let demand = state.demand.entry(category).or_insert(0.0);
            *demand = self.decay * *demand + (1.0 - self.decay) * observed;
        }
        state.window.clear();
        state.last_recalc = now;

        let n = WorkCategory::ALL.len() as f64;
        let floor = self.total * self.min_share;
        let distributable = (self.total - floor * n).max(0.0);
        let total_demand: f64 = state.demand.values().sum();

        let allocation: HashMap<WorkCategory, f64> = WorkCategory::ALL
            .into_iter()
            .map(|category| {
                let share = if total_demand > 0.0 {
                    state.demand.get(&category).copied().unwrap_or(0.0) / total_demand
                } else {
                    1.0 / n
                };
                (category, floor + distributable * share)
            })
            .collect();
        state.allocation = allocation;

        debug!(total_demand, "bandwidth reallocated");
    }
}

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use undertow_core::WorkCategory;

use crate::error::BroadcastError;
use crate::rule::ThrottleRule;

/// Broadcaster tuning, the `[broadcast]` table of the pipeline TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Rule applied to categories without an entry in `rules`.
    #[serde(default)]
    pub default_rule: ThrottleRule,
    /// Per-category overrides keyed by category name.
    #[serde(default)]
    pub rules: BTreeMap<String, ThrottleRule>,

    /// Updates at or above this priority skip throttling entirely.
    #[serde(default = "default_bypass_priority")]
    pub bypass_priority: u8,
    /// Throttled updates at or above this priority are buffered instead of dropped.
    #[serde(default = "default_buffer_priority")]
    pub buffer_priority: u8,
    /// Updates at or above this priority pay `1 / priority_boost` tokens.
    #[serde(default = "default_boost_priority")]
    pub boost_priority: u8,

    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Mailbox size used when a subscriber asks for zero.
    #[serde(default = "default_mailbox_capacity")]
    pub default_mailbox_capacity: usize,
    /// Larger mailbox requests are clamped to this.
    #[serde(default = "default_max_mailbox_capacity")]
    pub max_mailbox_capacity: usize,

    /// Without an activity signal for this long the user counts as idle.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Total admission budget in updates per second, shared across categories.
    #[serde(default = "default_total_bandwidth")]
    pub total_bandwidth: f64,
    /// Smallest share of the budget any category is allocated.
    #[serde(default = "default_min_share")]
    pub min_share: f64,
    /// Weight of the previous value in the demand EMA.
    #[serde(default = "default_demand_decay")]
    pub demand_decay: f64,
    #[serde(default = "default_recalc_interval_ms")]
    pub recalc_interval_ms: u64,
}

fn default_bypass_priority() -> u8 { 9 }
fn default_buffer_priority() -> u8 { 7 }
fn default_boost_priority() -> u8 { 7 }
fn default_buffer_capacity() -> usize { 256 }
fn default_flush_interval_ms() -> u64 { 500 }
fn default_mailbox_capacity() -> usize { 64 }
fn default_max_mailbox_capacity() -> usize { 4_096 }
fn default_idle_timeout_ms() -> u64 { 300_000 }
fn default_total_bandwidth() -> f64 { 100.0 }
fn default_min_share() -> f64 { 0.05 }
fn default_demand_decay() -> f64 { 0.95 }
fn default_recalc_interval_ms() -> u64 { 1_000 }

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            default_rule: ThrottleRule::default(),
            rules: BTreeMap::new(),
            bypass_priority: default_bypass_priority(),
            buffer_priority: default_buffer_priority(),
            boost_priority: default_boost_priority(),
            buffer_capacity: default_buffer_capacity(),
            flush_interval_ms: default_flush_interval_ms(),
            default_mailbox_capacity: default_mailbox_capacity(),
            max_mailbox_capacity: default_max_mailbox_capacity(),
            idle_timeout_ms: default_idle_timeout_ms(),
            total_bandwidth: default_total_bandwidth(),
            min_share: default_min_share(),
            demand_decay: default_demand_decay(),
            recalc_interval_ms: default_recalc_interval_ms(),
        }
    }
}

impl BroadcastConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn recalc_interval(&self) -> Duration {
        Duration::from_millis(self.recalc_interval_ms)
    }

    /// Mailbox size for a subscriber asking for `requested` slots.
    pub fn mailbox_capacity(&self, requested: usize) -> usize {
        if requested == 0 {
            self.default_mailbox_capacity
        } else {
            requested.min(self.max_mailbox_capacity)
        }
    }

    /// Rule for every category, overrides applied.
    pub fn category_rules(&self) -> Result<HashMap<WorkCategory, ThrottleRule>, BroadcastError> {
        let mut rules: HashMap<WorkCategory, ThrottleRule> = WorkCategory::ALL
            .into_iter()
            .map(|c| (c, self.default_rule.clone()))
            .collect();
        for (name, rule) in &self.rules {
            let category = name
                .parse::<WorkCategory>()
                .map_err(|e| BroadcastError::Config(e.to_string()))?;
            rules.insert(category, rule.clone());
        }
        Ok(rules)
    }

    pub fn validate(&self) -> Result<(), BroadcastError> {
        self.default_rule.validate()?;
        for rule in self.category_rules()?.values() {
            rule.validate()?;
        }
        if self.buffer_capacity == 0 || self.default_mailbox_capacity == 0 {
            return Err(BroadcastError::Config(
                "broadcast.buffer_capacity and default_mailbox_capacity must be at least 1".into(),
            ));
        }
        if self.max_mailbox_capacity > Semaphore::MAX_PERMITS
            || self.default_mailbox_capacity > self.max_mailbox_capacity
        {
            return Err(BroadcastError::Config(format!(
                "broadcast.max_mailbox_capacity must be within [default_mailbox_capacity, {}]",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.flush_interval_ms == 0 || self.recalc_interval_ms == 0 {
            return Err(BroadcastError::Config(
                "broadcast.flush_interval_ms and recalc_interval_ms must be non-zero".into(),
            ));
        }
        if !(self.total_bandwidth.is_finite() && self.total_bandwidth > 0.0) {
            return Err(BroadcastError::Config("broadcast.total_bandwidth must be positive".into()));
        }
        if !(0.0..=0.2).contains(&self.min_share) {
            return Err(BroadcastError::Config("broadcast.min_share must be within [0, 0.2]".into()));
        }
        if !(self.demand_decay > 0.0 && self.demand_decay < 1.0) {
            return Err(BroadcastError::Config("broadcast.demand_decay must be in (0, 1)".into()));
        }
        Ok(())
    }
}

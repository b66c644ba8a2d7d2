use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entry::Tier;
use crate::error::CacheError;

/// Tiered cache and prefetch tuning, the `[cache]` table of the pipeline TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_hot_capacity")]
    pub hot_capacity: usize,
    #[serde(default = "default_warm_capacity")]
    pub warm_capacity: usize,
    #[serde(default = "default_cold_capacity")]
    pub cold_capacity: usize,

    /// Multiplier applied to the caller's ttl for each tier.
    #[serde(default = "default_hot_ttl_scale")]
    pub hot_ttl_scale: f64,
    #[serde(default = "default_warm_ttl_scale")]
    pub warm_ttl_scale: f64,
    #[serde(default = "default_cold_ttl_scale")]
    pub cold_ttl_scale: f64,

    /// Period of the cold-tier expiry sweep.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Upper bound on prefetch items submitted for a single miss.
    #[serde(default = "default_prefetch_fanout")]
    pub prefetch_fanout: usize,
    #[serde(default = "default_prefetch_priority")]
    pub prefetch_priority: u8,
    /// Deadline given to prefetch items, relative to submission.
    #[serde(default = "default_prefetch_deadline_ms")]
    pub prefetch_deadline_ms: u64,
    /// Ttl used when a prefetched result is cached.
    #[serde(default = "default_prefetch_ttl_ms")]
    pub prefetch_ttl_ms: u64,

    /// Keys accessed within this window of each other become correlated.
    #[serde(default = "default_correlation_window_ms")]
    pub correlation_window_ms: u64,
    #[serde(default = "default_max_correlations")]
    pub max_correlations: usize,
    /// How many recently accessed keys a new access is correlated against.
    #[serde(default = "default_max_recent_keys")]
    pub max_recent_keys: usize,
    /// Weight of the previous value in the access-frequency EMA.
    #[serde(default = "default_frequency_decay")]
    pub frequency_decay: f64,
    #[serde(default = "default_interval_history")]
    pub interval_history: usize,
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: usize,

    /// Capacity of the invalidation event channel.
    #[serde(default = "default_invalidation_capacity")]
    pub invalidation_capacity: usize,
}

fn default_hot_capacity() -> usize { 256 }
fn default_warm_capacity() -> usize { 2_048 }
fn default_cold_capacity() -> usize { 16_384 }
fn default_hot_ttl_scale() -> f64 { 1.0 }
fn default_warm_ttl_scale() -> f64 { 2.0 }
fn default_cold_ttl_scale() -> f64 { 4.0 }
fn default_sweep_interval_ms() -> u64 { 30_000 }
fn default_prefetch_fanout() -> usize { 3 }
fn default_prefetch_priority() -> u8 { 3 }
fn default_prefetch_deadline_ms() -> u64 { 500 }
fn default_prefetch_ttl_ms() -> u64 { 60_000 }
fn default_correlation_window_ms() -> u64 { 1_000 }
fn default_max_correlations() -> usize { 16 }
fn default_max_recent_keys() -> usize { 32 }
fn default_frequency_decay() -> f64 { 0.9 }
fn default_interval_history() -> usize { 10 }
fn default_max_tracked_keys() -> usize { 10_000 }
fn default_invalidation_capacity() -> usize { 256 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hot_capacity: default_hot_capacity(),
            warm_capacity: default_warm_capacity(),
            cold_capacity: default_cold_capacity(),
            hot_ttl_scale: default_hot_ttl_scale(),
            warm_ttl_scale: default_warm_ttl_scale(),
            cold_ttl_scale: default_cold_ttl_scale(),
            sweep_interval_ms: default_sweep_interval_ms(),
            prefetch_fanout: default_prefetch_fanout(),
            prefetch_priority: default_prefetch_priority(),
            prefetch_deadline_ms: default_prefetch_deadline_ms(),
            prefetch_ttl_ms: default_prefetch_ttl_ms(),
            correlation_window_ms: default_correlation_window_ms(),
            max_correlations: default_max_correlations(),
            max_recent_keys: default_max_recent_keys(),
            frequency_decay: default_frequency_decay(),
            interval_history: default_interval_history(),
            max_tracked_keys: default_max_tracked_keys(),
            invalidation_capacity: default_invalidation_capacity(),
        }
    }
}

impl CacheConfig {
    pub fn capacity(&self, tier: Tier) -> usize {
        match tier {
            Tier::Hot => self.hot_capacity,
            Tier::Warm => self.warm_capacity,
            Tier::Cold => self.cold_capacity,
        }
    }

    pub fn ttl_scale(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Hot => self.hot_ttl_scale,
            Tier::Warm => self.warm_ttl_scale,
            Tier::Cold => self.cold_ttl_scale,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn prefetch_deadline(&self) -> Duration {
        Duration::from_millis(self.prefetch_deadline_ms)
    }

    pub fn prefetch_ttl(&self) -> Duration {
        Duration::from_millis(self.prefetch_ttl_ms)
    }

    pub fn correlation_window(&self) -> Duration {
        Duration::from_millis(self.correlation_window_ms)
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        for tier in Tier::ALL {
            if self.capacity(tier) == 0 {
                return Err(CacheError::Config(format!("cache.{tier}_capacity must be at least 1")));
            }
            let scale = self.ttl_scale(tier);
            if !scale.is_finite() || scale <= 0.0 {
                return Err(CacheError::Config(format!("cache.{tier}_ttl_scale must be positive")));
            }
        }
        if !(self.hot_ttl_scale <= self.warm_ttl_scale && self.warm_ttl_scale <= self.cold_ttl_scale) {
            return Err(CacheError::Config(
                "cache ttl scales must satisfy hot <= warm <= cold".into(),
            ));
        }
        if !(self.frequency_decay > 0.0 && self.frequency_decay < 1.0) {
            return Err(CacheError::Config("cache.frequency_decay must be in (0, 1)".into()));
        }
        if self.prefetch_fanout > 16 {
            return Err(CacheError::Config("cache.prefetch_fanout must be at most 16".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(CacheError::Config("cache.sweep_interval_ms must be non-zero".into()));
        }
        if self.interval_history == 0 || self.max_tracked_keys == 0 || self.invalidation_capacity == 0 {
            return Err(CacheError::Config(
                "cache.interval_history, max_tracked_keys and invalidation_capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

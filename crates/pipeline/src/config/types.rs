use std::time::Duration;

use serde::{Deserialize, Serialize};
use undertow_broadcast::BroadcastConfig;
use undertow_cache::CacheConfig;
use undertow_dispatch::DispatchConfig;

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration for a [`Pipeline`](crate::Pipeline).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Settings of the owner itself: routing and stats history.
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

// ── Owner settings ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Ttl stamped on updates built from work results.
    #[serde(default = "default_update_ttl_ms")]
    pub update_ttl_ms: u64,

    /// Cache ttl for results whose item carried a key but no ttl.
    #[serde(default = "default_result_cache_ttl_ms")]
    pub result_cache_ttl_ms: u64,

    /// Priority of the updates announcing cache invalidations.
    #[serde(default = "default_invalidation_priority")]
    pub invalidation_priority: u8,

    /// How often a stats snapshot is appended to the history.
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,

    /// Stats points kept in the pipeline history.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_update_ttl_ms() -> u64 { 30_000 }
fn default_result_cache_ttl_ms() -> u64 { 60_000 }
fn default_invalidation_priority() -> u8 { 8 }
fn default_stats_interval_ms() -> u64 { 1_000 }
fn default_history_capacity() -> usize { 300 }

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            update_ttl_ms: default_update_ttl_ms(),
            result_cache_ttl_ms: default_result_cache_ttl_ms(),
            invalidation_priority: default_invalidation_priority(),
            stats_interval_ms: default_stats_interval_ms(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl PipelineSettings {
    pub fn update_ttl(&self) -> Duration {
        Duration::from_millis(self.update_ttl_ms)
    }

    pub fn result_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.result_cache_ttl_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

use std::path::Path;
use std::str::FromStr;

use tracing::warn;

use super::types::PipelineConfig;
use crate::error::PipelineError;

impl PipelineConfig {
    /// Parse config from a TOML string, then apply env overrides and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, PipelineError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus env overrides, for running without a config file.
    pub fn from_env() -> Result<Self, PipelineError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `UNDERTOW_SECTION_KEY` overrides `section.key`.
    /// Examples:
    /// - `UNDERTOW_DISPATCH_WORKERS` -> `dispatch.workers`
    /// - `UNDERTOW_CACHE_HOT_CAPACITY` -> `cache.hot_capacity`
    /// - `UNDERTOW_BROADCAST_FLUSH_INTERVAL_MS` -> `broadcast.flush_interval_ms`
    /// - `UNDERTOW_PIPELINE_UPDATE_TTL_MS` -> `pipeline.update_ttl_ms`
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        let d = &mut self.dispatch;
        env_override("UNDERTOW_DISPATCH_WORKERS", &mut d.workers);
        env_override("UNDERTOW_DISPATCH_DISPATCH_CAPACITY", &mut d.dispatch_capacity);
        env_override("UNDERTOW_DISPATCH_ADMISSION_TICK_MS", &mut d.admission_tick_ms);
        env_override("UNDERTOW_DISPATCH_THROTTLE_WINDOW_MS", &mut d.throttle_window_ms);
        env_override("UNDERTOW_DISPATCH_THROTTLE_BACKOFF_MS", &mut d.throttle_backoff_ms);

        let c = &mut self.cache;
        env_override("UNDERTOW_CACHE_HOT_CAPACITY", &mut c.hot_capacity);
        env_override("UNDERTOW_CACHE_WARM_CAPACITY", &mut c.warm_capacity);
        env_override("UNDERTOW_CACHE_COLD_CAPACITY", &mut c.cold_capacity);
        env_override("UNDERTOW_CACHE_HOT_TTL_SCALE", &mut c.hot_ttl_scale);
        env_override("UNDERTOW_CACHE_WARM_TTL_SCALE", &mut c.warm_ttl_scale);
        env_override("UNDERTOW_CACHE_COLD_TTL_SCALE", &mut c.cold_ttl_scale);
        env_override("UNDERTOW_CACHE_SWEEP_INTERVAL_MS", &mut c.sweep_interval_ms);
        env_override("UNDERTOW_CACHE_PREFETCH_FANOUT", &mut c.prefetch_fanout);
        env_override("UNDERTOW_CACHE_PREFETCH_PRIORITY", &mut c.prefetch_priority);
        env_override("UNDERTOW_CACHE_FREQUENCY_DECAY", &mut c.frequency_decay);
        env_override("UNDERTOW_CACHE_MAX_RECENT_KEYS", &mut c.max_recent_keys);

        let b = &mut self.broadcast;
        env_override("UNDERTOW_BROADCAST_BYPASS_PRIORITY", &mut b.bypass_priority);
        env_override("UNDERTOW_BROADCAST_BUFFER_PRIORITY", &mut b.buffer_priority);
        env_override("UNDERTOW_BROADCAST_BUFFER_CAPACITY", &mut b.buffer_capacity);
        env_override("UNDERTOW_BROADCAST_FLUSH_INTERVAL_MS", &mut b.flush_interval_ms);
        env_override("UNDERTOW_BROADCAST_IDLE_TIMEOUT_MS", &mut b.idle_timeout_ms);
        env_override("UNDERTOW_BROADCAST_MAX_MAILBOX_CAPACITY", &mut b.max_mailbox_capacity);
        env_override("UNDERTOW_BROADCAST_TOTAL_BANDWIDTH", &mut b.total_bandwidth);
        env_override("UNDERTOW_BROADCAST_MAX_RATE", &mut b.default_rule.max_rate);
        env_override("UNDERTOW_BROADCAST_BURST", &mut b.default_rule.burst);

        let p = &mut self.pipeline;
        env_override("UNDERTOW_PIPELINE_UPDATE_TTL_MS", &mut p.update_ttl_ms);
        env_override("UNDERTOW_PIPELINE_RESULT_CACHE_TTL_MS", &mut p.result_cache_ttl_ms);
        env_override("UNDERTOW_PIPELINE_STATS_INTERVAL_MS", &mut p.stats_interval_ms);
        env_override("UNDERTOW_PIPELINE_HISTORY_CAPACITY", &mut p.history_capacity);
    }
}

fn env_override<T: FromStr>(var: &str, target: &mut T) {
    let Ok(raw) = std::env::var(var) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => warn!(var, value = %raw, "ignoring unparsable env override"),
    }
}

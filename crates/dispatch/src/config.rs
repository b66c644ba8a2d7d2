use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use undertow_core::WorkCategory;

use crate::error::DispatchError;

/// Worker pool configuration, typically the `[dispatch]` table of the pipeline TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the bounded buffer between admission and the workers.
    #[serde(default = "default_dispatch_capacity")]
    pub dispatch_capacity: usize,
    /// Admission loop tick in milliseconds.
    #[serde(default = "default_admission_tick_ms")]
    pub admission_tick_ms: u64,
    /// Minimum spacing between two admitted items of one category. 0 disables throttling.
    #[serde(default = "default_throttle_window_ms")]
    pub throttle_window_ms: u64,
    /// Delay before a throttled item becomes eligible again.
    #[serde(default = "default_throttle_backoff_ms")]
    pub throttle_backoff_ms: u64,
    /// Per-category window overrides, keyed by category name.
    #[serde(default)]
    pub category_windows_ms: BTreeMap<String, u64>,
}

fn default_workers() -> usize { 4 }
fn default_dispatch_capacity() -> usize { 64 }
fn default_admission_tick_ms() -> u64 { 50 }
fn default_throttle_window_ms() -> u64 { 100 }
fn default_throttle_backoff_ms() -> u64 { 250 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            dispatch_capacity: default_dispatch_capacity(),
            admission_tick_ms: default_admission_tick_ms(),
            throttle_window_ms: default_throttle_window_ms(),
            throttle_backoff_ms: default_throttle_backoff_ms(),
            category_windows_ms: BTreeMap::new(),
        }
    }
}

impl DispatchConfig {
    pub fn admission_tick(&self) -> Duration {
        Duration::from_millis(self.admission_tick_ms)
    }

    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }

    pub fn throttle_backoff(&self) -> Duration {
        Duration::from_millis(self.throttle_backoff_ms)
    }

    /// Parse the per-category overrides into typed windows.
    pub fn category_windows(&self) -> Result<HashMap<WorkCategory, Duration>, DispatchError> {
        self.category_windows_ms
            .iter()
            .map(|(name, ms)| {
                let category = name
                    .parse::<WorkCategory>()
                    .map_err(|e| DispatchError::Config(e.to_string()))?;
                Ok((category, Duration::from_millis(*ms)))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.workers == 0 {
            return Err(DispatchError::Config("dispatch.workers must be at least 1".into()));
        }
        if self.dispatch_capacity == 0 {
            return Err(DispatchError::Config(
                "dispatch.dispatch_capacity must be at least 1".into(),
            ));
        }
        if self.admission_tick_ms == 0 {
            return Err(DispatchError::Config(
                "dispatch.admission_tick_ms must be non-zero".into(),
            ));
        }
        self.category_windows()?;
        Ok(())
    }
}

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use undertow_core::sync::lock;
use undertow_core::WorkCategory;

/// Per-category admission spacing.
///
/// A request is throttled when the previous admitted request of the same
/// category happened less than one window ago. Only admitted requests move
/// the window forward.
#[derive(Debug)]
pub struct RateThrottle {
    default_window: Duration,
    windows: HashMap<WorkCategory, Duration>,
    last_admitted: Mutex<HashMap<WorkCategory, Instant>>,
}

impl RateThrottle {
    pub fn new(default_window: Duration) -> Self {
        Self {
            default_window,
            windows: HashMap::new(),
            last_admitted: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_windows(mut self, windows: HashMap<WorkCategory, Duration>) -> Self {
        self.windows.extend(windows);
        self
    }

    pub fn with_window(mut self, category: WorkCategory, window: Duration) -> Self {
        self.windows.insert(category, window);
        self
    }

    pub fn window_for(&self, category: WorkCategory) -> Duration {
        self.windows.get(&category).copied().unwrap_or(self.default_window)
    }

    pub fn should_throttle(&self, category: WorkCategory) -> bool {
        self.should_throttle_at(category, Instant::now())
    }

    /// Returns `true` to throttle; otherwise records `now` as the admission time.
    pub fn should_throttle_at(&self, category: WorkCategory, now: Instant) -> bool {
        let window = self.window_for(category);
        let mut last = lock(&self.last_admitted);
        match last.get(&category) {
            Some(&admitted) if !window.is_zero() && now.saturating_duration_since(admitted) < window => {
                true
            }
            _ => {
                last.insert(category, now);
                false
            }
        }
    }

    pub fn reset(&self) {
        lock(&self.last_admitted).clear();
    }
}

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;
use undertow_core::sync::lock;
use undertow_core::ActivityLevel;

#[derive(Debug)]
struct ActivityState {
    level: ActivityLevel,
    typing_rate: f64,
    last_signal: Instant,
}

/// Latest UI activity signal, decaying to idle when the UI goes quiet.
#[derive(Debug)]
pub struct UserActivityTracker {
    state: Mutex<ActivityState>,
    idle_timeout: Duration,
}

impl UserActivityTracker {
    /// Starts at moderate activity.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(ActivityState {
                level: ActivityLevel::Moderate,
                typing_rate: 0.0,
                last_signal: Instant::now(),
            }),
            idle_timeout,
        }
    }

    /// Record a signal from the UI. `typing_rate` is keystrokes per second.
    pub fn record(&self, level: ActivityLevel, typing_rate: f64) {
        self.record_at(level, typing_rate, Instant::now());
    }

    pub fn record_at(&self, level: ActivityLevel, typing_rate: f64, now: Instant) {
        let mut state = lock(&self.state);
        if state.level != level {
            debug!(from = %state.level, to = %level, "activity level changed");
        }
        state.level = level;
        state.typing_rate = typing_rate.max(0.0);
        state.last_signal = now;
    }

    pub fn level(&self) -> ActivityLevel {
        self.level_at(Instant::now())
    }

    pub fn level_at(&self, now: Instant) -> ActivityLevel {
        let state = lock(&self.state);
        if now.saturating_duration_since(state.last_signal) > self.idle_timeout {
            ActivityLevel::Idle
        } else {
            state.level
        }
    }

    pub fn multiplier(&self) -> f64 {
        self.level().rate_multiplier()
    }

    pub fn multiplier_at(&self, now: Instant) -> f64 {
        self.level_at(now).rate_multiplier()
    }

    pub fn typing_rate(&self) -> f64 {
        lock(&self.state).typing_rate
    }
}

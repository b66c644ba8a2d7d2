use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::BroadcastError;

/// Sustained rate, burst allowance and optional high-priority discount for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleRule {
    /// Updates per second at moderate activity.
    #[serde(default = "default_max_rate")]
    pub max_rate: f64,
    /// Updates admitted back to back after a quiet period.
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// High-priority updates cost `1 / priority_boost` tokens.
    #[serde(default)]
    pub priority_boost: Option<f64>,
}

fn default_max_rate() -> f64 { 10.0 }
fn default_burst() -> u32 { 20 }

impl Default for ThrottleRule {
    fn default() -> Self {
        Self {
            max_rate: default_max_rate(),
            burst: default_burst(),
            priority_boost: Some(2.0),
        }
    }
}

impl ThrottleRule {
    pub fn new(max_rate: f64, burst: u32) -> Self {
        Self {
            max_rate,
            burst,
            priority_boost: None,
        }
    }

    pub fn with_priority_boost(mut self, boost: f64) -> Self {
        self.priority_boost = Some(boost);
        self
    }

    /// Token cost of one update; boosted updates are cheaper.
    pub fn cost(&self, boosted: bool) -> f64 {
        match self.priority_boost {
            Some(boost) if boosted && boost > 1.0 => 1.0 / boost,
            _ => 1.0,
        }
    }

    pub fn validate(&self) -> Result<(), BroadcastError> {
        if !(self.max_rate.is_finite() && self.max_rate >= 0.0) {
            return Err(BroadcastError::Config("throttle max_rate must be non-negative".into()));
        }
        if self.burst == 0 {
            return Err(BroadcastError::Config("throttle burst must be at least 1".into()));
        }
        if let Some(boost) = self.priority_boost {
            if !(boost.is_finite() && boost >= 1.0) {
                return Err(BroadcastError::Config("throttle priority_boost must be >= 1".into()));
            }
        }
        Ok(())
    }
}

/// Token bucket holding at most `burst` tokens, refilled continuously.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(burst: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(burst),
            last_refill: now,
        }
    }

    fn refill(&mut self, rate: f64, burst: u32, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(f64::from(burst));
        self.last_refill = now;
    }

    /// Take `cost` tokens if available after refilling at `rate` per second.
    pub fn try_take(&mut self, cost: f64, rate: f64, burst: u32, now: Instant) -> bool {
        self.refill(rate, burst, now);
        if self.tokens + f64::EPSILON >= cost {
            self.tokens = (self.tokens - cost).max(0.0);
            true
        } else {
            false
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn burst_then_rate() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(3, t0);
        let admitted = (0..10).filter(|_| bucket.try_take(1.0, 10.0, 3, t0)).count();
        assert_eq!(admitted, 3);

        // 10/s refills one token every 100ms.
        assert!(bucket.try_take(1.0, 10.0, 3, t0 + Duration::from_millis(100)));
        assert!(!bucket.try_take(1.0, 10.0, 3, t0 + Duration::from_millis(150)));
    }

    #[test]
    fn admissions_never_exceed_burst_plus_rate_times_window() {
        let t0 = Instant::now();
        let (rate, burst) = (5.0, 4);
        let mut bucket = TokenBucket::new(burst, t0);
        let mut admitted = 0;
        for ms in 0..2_000u64 {
            if bucket.try_take(1.0, rate, burst, t0 + Duration::from_millis(ms)) {
                admitted += 1;
            }
        }
        let bound = f64::from(burst) + (rate * 2.0).ceil();
        assert!(admitted as f64 <= bound, "{admitted} > {bound}");
        assert!(admitted >= 13);
    }

    #[test]
    fn refill_caps_at_burst() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(2, t0);
        assert!(bucket.try_take(2.0, 1.0, 2, t0));
        bucket.try_take(0.0, 1.0, 2, t0 + Duration::from_secs(60));
        assert_eq!(bucket.tokens(), 2.0);
    }

    #[test]
    fn boost_discounts_high_priority() {
        let rule = ThrottleRule::new(1.0, 1).with_priority_boost(4.0);
        assert_eq!(rule.cost(true), 0.25);
        assert_eq!(rule.cost(false), 1.0);
        assert_eq!(ThrottleRule::new(1.0, 1).cost(true), 1.0);
        assert!(ThrottleRule::new(1.0, 0).validate().is_err());
    }
}

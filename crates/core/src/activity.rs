use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How busy the interactive user currently is, as reported by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Idle,
    Low,
    Moderate,
    High,
    Intense,
}

impl ActivityLevel {
    pub const ALL: [ActivityLevel; 5] = [
        ActivityLevel::Idle,
        ActivityLevel::Low,
        ActivityLevel::Moderate,
        ActivityLevel::High,
        ActivityLevel::Intense,
    ];

    /// Scale applied to broadcast throttle rates at this level.
    pub fn rate_multiplier(self) -> f64 {
        match self {
            ActivityLevel::Idle => 0.2,
            ActivityLevel::Low => 0.5,
            ActivityLevel::Moderate => 1.0,
            ActivityLevel::High => 1.5,
            ActivityLevel::Intense => 2.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityLevel::Idle => "idle",
            ActivityLevel::Low => "low",
            ActivityLevel::Moderate => "moderate",
            ActivityLevel::High => "high",
            ActivityLevel::Intense => "intense",
        }
    }
}

impl fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActivityLevel::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::UnknownActivityLevel(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipliers_increase_with_activity() {
        let m: Vec<f64> = ActivityLevel::ALL.iter().map(|l| l.rate_multiplier()).collect();
        assert_eq!(m, vec![0.2, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn parses_names() {
        assert_eq!("Intense".parse::<ActivityLevel>().unwrap(), ActivityLevel::Intense);
        assert!("frantic".parse::<ActivityLevel>().is_err());
    }
}

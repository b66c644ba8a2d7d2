use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Kind of background work. Selects the handler a worker runs and the
/// throttle rule the broadcaster applies to the resulting updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkCategory {
    Analysis,
    Prediction,
    Validation,
    Optimization,
    Diagnostic,
}

impl WorkCategory {
    pub const ALL: [WorkCategory; 5] = [
        WorkCategory::Analysis,
        WorkCategory::Prediction,
        WorkCategory::Validation,
        WorkCategory::Optimization,
        WorkCategory::Diagnostic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkCategory::Analysis => "analysis",
            WorkCategory::Prediction => "prediction",
            WorkCategory::Validation => "validation",
            WorkCategory::Optimization => "optimization",
            WorkCategory::Diagnostic => "diagnostic",
        }
    }
}

impl fmt::Display for WorkCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::UnknownCategory(s.to_string()))
    }
}

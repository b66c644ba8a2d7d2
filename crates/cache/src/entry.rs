use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use undertow_core::{Payload, WorkCategory};

/// One level of the cache hierarchy, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Hot, Tier::Warm, Tier::Cold];

    pub fn index(self) -> usize {
        match self {
            Tier::Hot => 0,
            Tier::Warm => 1,
            Tier::Cold => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
        }
    }

    /// Tiers strictly faster than `self`, fastest first.
    pub fn faster(self) -> &'static [Tier] {
        &Tier::ALL[..self.index()]
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `ttl × factor`, saturating at `Duration::MAX` instead of panicking.
pub fn scale_ttl(ttl: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(ttl.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// A cached value as stored in one tier.
///
/// The same key may live in several tiers at once; each copy carries its own
/// timestamps and ttl and expires independently.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Payload,
    pub category: WorkCategory,
    pub tier: Tier,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u64,
    pub ttl: Duration,
    /// Approximate encoded size in bytes.
    pub size: usize,
    /// Keys this entry was derived from; invalidating one removes this entry too.
    pub dependencies: Vec<String>,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        value: Payload,
        category: WorkCategory,
        tier: Tier,
        ttl: Duration,
        now: Instant,
    ) -> Self {
        let size = value.approx_size();
        Self {
            key: key.into(),
            value,
            category,
            tier,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            ttl,
            size,
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Expired iff strictly more than `ttl` has passed since creation.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    pub fn remaining_ttl(&self, now: Instant) -> Duration {
        self.ttl.saturating_sub(now.saturating_duration_since(self.created_at))
    }

    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_accessed)
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_accessed = now;
        self.access_count += 1;
    }

    pub fn depends_on(&self, key: &str) -> bool {
        self.dependencies.iter().any(|d| d == key)
    }

    /// Copy for `target`, created `now` with the ttl rescaled from this tier's scale.
    pub fn promoted(&self, target: Tier, source_scale: f64, target_scale: f64, now: Instant) -> Self {
        let base = scale_ttl(self.ttl, source_scale.recip());
        Self {
            tier: target,
            created_at: now,
            last_accessed: now,
            ttl: scale_ttl(base, target_scale),
            ..self.clone()
        }
    }
}

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::category::WorkCategory;
use crate::payload::Payload;
use crate::work::{clamp_priority, WorkResult};

/// A state-change notification fanned out to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub id: Uuid,
    pub category: WorkCategory,
    pub priority: u8,
    pub payload: Payload,
    /// Cache keys consumers should drop when they see this update.
    #[serde(default)]
    pub invalidate_keys: Vec<String>,
    /// How long the update stays relevant; buffered updates older than this are discarded.
    pub ttl: Duration,
    pub produced_at: DateTime<Utc>,
}

impl Update {
    pub fn new(category: WorkCategory, priority: u8, payload: impl Into<Payload>) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            priority: clamp_priority(priority),
            payload: payload.into(),
            invalidate_keys: Vec::new(),
            ttl: Duration::from_secs(30),
            produced_at: Utc::now(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_invalidations(mut self, keys: Vec<String>) -> Self {
        self.invalidate_keys = keys;
        self
    }

    /// Wrap a finished work result. Failed results carry the error text.
    pub fn from_result(result: &WorkResult, ttl: Duration) -> Self {
        let payload = match (&result.payload, &result.error) {
            (Some(p), _) => p.clone(),
            (None, Some(err)) => Payload::Text(err.clone()),
            (None, None) => Payload::Empty,
        };
        let mut update = Self::new(result.category, result.priority, payload).with_ttl(ttl);
        update.id = result.id;
        if let Some(key) = &result.cache_key {
            update.invalidate_keys.push(key.clone());
        }
        update
    }

    /// Notification that cache entries were invalidated.
    pub fn invalidation(category: WorkCategory, priority: u8, keys: Vec<String>) -> Self {
        Self::new(category, priority, Payload::Empty).with_invalidations(keys)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.produced_at);
        age.to_std().map(|age| age > self.ttl).unwrap_or(false)
    }
}

//! Access-pattern tracking and correlation-driven prefetch.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use undertow_core::sync::lock;
use undertow_core::{WorkCategory, WorkItem};
use undertow_dispatch::WorkerPool;

use crate::config::CacheConfig;

pub fn key_hash(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Where prefetch work goes. Implementations must never block or queue:
/// returning `false` means the item was skipped.
pub trait PrefetchSink: Send + Sync {
    fn try_prefetch(&self, item: WorkItem) -> bool;
}

impl PrefetchSink for WorkerPool {
    fn try_prefetch(&self, item: WorkItem) -> bool {
        self.try_dispatch(item).is_ok()
    }
}

/// What is known about how one key gets accessed.
#[derive(Debug, Clone)]
pub struct AccessPattern {
    pub key_hash: u64,
    pub key: String,
    /// Category of the most recent access, used for prefetch items.
    pub category: Option<WorkCategory>,
    /// Exponentially weighted accesses per second.
    pub frequency: f64,
    pub access_count: u64,
    /// Most recent inter-access intervals, oldest first.
    pub intervals: VecDeque<Duration>,
    /// Correlated keys, most recent first.
    pub correlated: VecDeque<String>,
    pub last_access: Instant,
}

impl AccessPattern {
    fn new(key: &str, hash: u64, now: Instant) -> Self {
        Self {
            key_hash: hash,
            key: key.to_string(),
            category: None,
            frequency: 0.0,
            access_count: 0,
            intervals: VecDeque::new(),
            correlated: VecDeque::new(),
            last_access: now,
        }
    }

    pub fn mean_interval(&self) -> Option<Duration> {
        if self.intervals.is_empty() {
            return None;
        }
        let total: Duration = self.intervals.iter().sum();
        Some(total / self.intervals.len() as u32)
    }

    fn correlate(&mut self, other: &str, limit: usize) {
        if let Some(pos) = self.correlated.iter().position(|k| k == other) {
            self.correlated.remove(pos);
        }
        self.correlated.push_front(other.to_string());
        self.correlated.truncate(limit);
    }
}

struct PrefetchState {
    patterns: LruCache<u64, AccessPattern>,
    /// Accesses still inside the correlation window, newest last, at most
    /// `max_recent` long.
    recent: VecDeque<(u64, String, Instant)>,
}

/// Tracks per-key access patterns and proposes correlated keys on a miss.
pub struct PrefetchEngine {
    state: Mutex<PrefetchState>,
    decay: f64,
    history: usize,
    window: Duration,
    max_correlations: usize,
    max_recent: usize,
}

impl PrefetchEngine {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_tracked_keys).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(PrefetchState {
                patterns: LruCache::new(capacity),
                recent: VecDeque::new(),
            }),
            decay: config.frequency_decay,
            history: config.interval_history,
            window: config.correlation_window(),
            max_correlations: config.max_correlations,
            max_recent: config.max_recent_keys,
        }
    }

    /// Update the key's pattern and correlate it with keys accessed within the window.
    pub fn record_access(&self, key: &str, category: WorkCategory, now: Instant) {
        let hash = key_hash(key);
        let mut state = lock(&self.state);

        {
            let pattern = state
                .patterns
                .get_or_insert_mut(hash, || AccessPattern::new(key, hash, now));
            if pattern.access_count > 0 {
                let interval = now.saturating_duration_since(pattern.last_access);
                let secs = interval.as_secs_f64().max(1e-3);
                pattern.frequency = self.decay * pattern.frequency + (1.0 - self.decay) * (1.0 / secs);
                pattern.intervals.push_back(interval);
                while pattern.intervals.len() > self.history {
                    pattern.intervals.pop_front();
                }
            }
            pattern.access_count += 1;
            pattern.last_access = now;
            pattern.category = Some(category);
        }

        while let Some((_, _, at)) = state.recent.front() {
            if now.saturating_duration_since(*at) > self.window {
                state.recent.pop_front();
            } else {
                break;
            }
        }

        let neighbours: Vec<(u64, String)> = state
            .recent
            .iter()
            .filter(|(h, _, _)| *h != hash)
            .map(|(h, k, _)| (*h, k.clone()))
            .collect();
        for (other_hash, other_key) in neighbours {
            self.link(&mut state, hash, key, other_hash, &other_key);
        }

        state.recent.retain(|(h, _, _)| *h != hash);
        state.recent.push_back((hash, key.to_string(), now));
        while state.recent.len() > self.max_recent {
            state.recent.pop_front();
        }
    }

    /// Correlate two keys explicitly, e.g. a value and the keys it depends on.
    pub fn record_correlation(&self, a: &str, b: &str) {
        if a == b {
            return;
        }
        let now = Instant::now();
        let mut state = lock(&self.state);
        let (ha, hb) = (key_hash(a), key_hash(b));
        for (hash, key) in [(ha, a), (hb, b)] {
            if !state.patterns.contains(&hash) {
                state.patterns.put(hash, AccessPattern::new(key, hash, now));
            }
        }
        self.link(&mut state, ha, a, hb, b);
    }

    fn link(&self, state: &mut PrefetchState, ha: u64, a: &str, hb: u64, b: &str) {
        if let Some(p) = state.patterns.peek_mut(&ha) {
            p.correlate(b, self.max_correlations);
        }
        if let Some(p) = state.patterns.peek_mut(&hb) {
            p.correlate(a, self.max_correlations);
        }
    }

    /// Up to `limit` keys correlated with `key`, most recent first.
    pub fn candidates(&self, key: &str, limit: usize) -> Vec<String> {
        let state = lock(&self.state);
        state
            .patterns
            .peek(&key_hash(key))
            .map(|p| p.correlated.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn category_of(&self, key: &str) -> Option<WorkCategory> {
        lock(&self.state).patterns.peek(&key_hash(key)).and_then(|p| p.category)
    }

    pub fn pattern(&self, key: &str) -> Option<AccessPattern> {
        lock(&self.state).patterns.peek(&key_hash(key)).cloned()
    }

    pub fn forget(&self, key: &str) {
        let hash = key_hash(key);
        let mut state = lock(&self.state);
        state.patterns.pop(&hash);
        state.recent.retain(|(h, _, _)| *h != hash);
    }

    pub fn tracked(&self) -> usize {
        lock(&self.state).patterns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PrefetchEngine {
        PrefetchEngine::new(&CacheConfig {
            correlation_window_ms: 100,
            max_correlations: 2,
            ..CacheConfig::default()
        })
    }

    #[test]
    fn frequency_follows_ema() {
        let engine = engine();
        let t0 = Instant::now();
        engine.record_access("k", WorkCategory::Analysis, t0);
        assert_eq!(engine.pattern("k").unwrap().frequency, 0.0);

        engine.record_access("k", WorkCategory::Analysis, t0 + Duration::from_millis(500));
        let p = engine.pattern("k").unwrap();
        // 0.9 * 0 + 0.1 * (1 / 0.5s)
        assert!((p.frequency - 0.2).abs() < 1e-9);
        assert_eq!(p.access_count, 2);
        assert_eq!(p.mean_interval(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn interval_history_is_bounded() {
        let engine = engine();
        let t0 = Instant::now();
        for i in 0..25u64 {
            engine.record_access("k", WorkCategory::Analysis, t0 + Duration::from_secs(i));
        }
        assert_eq!(engine.pattern("k").unwrap().intervals.len(), 10);
    }

    #[test]
    fn keys_accessed_together_are_correlated_both_ways() {
        let engine = engine();
        let t0 = Instant::now();
        engine.record_access("pods", WorkCategory::Analysis, t0);
        engine.record_access("events", WorkCategory::Analysis, t0 + Duration::from_millis(10));
        engine.record_access("far", WorkCategory::Analysis, t0 + Duration::from_secs(5));

        assert_eq!(engine.candidates("pods", 3), vec!["events".to_string()]);
        assert_eq!(engine.candidates("events", 3), vec!["pods".to_string()]);
        assert!(engine.candidates("far", 3).is_empty());
    }

    #[test]
    fn scan_correlates_only_with_recent_keys() {
        let engine = PrefetchEngine::new(&CacheConfig {
            max_recent_keys: 4,
            max_correlations: 64,
            ..CacheConfig::default()
        });
        let t0 = Instant::now();
        for i in 0..1_000 {
            engine.record_access(&format!("scan/{i}"), WorkCategory::Analysis, t0);
        }

        let last = engine.candidates("scan/999", 64);
        assert_eq!(last, vec!["scan/998", "scan/997", "scan/996", "scan/995"]);
        // Early keys only saw their own short neighbourhood.
        assert!(engine.candidates("scan/0", 64).len() <= 4);
        assert!(engine.candidates("scan/500", 64).len() <= 8);
    }

    #[test]
    fn correlations_are_bounded_most_recent_first() {
        let engine = engine();
        engine.record_correlation("root", "a");
        engine.record_correlation("root", "b");
        engine.record_correlation("root", "c");
        assert_eq!(engine.candidates("root", 10), vec!["c".to_string(), "b".to_string()]);
        assert_eq!(engine.candidates("root", 1), vec!["c".to_string()]);
    }

    #[test]
    fn forget_drops_pattern() {
        let engine = engine();
        engine.record_access("k", WorkCategory::Validation, Instant::now());
        assert_eq!(engine.category_of("k"), Some(WorkCategory::Validation));
        engine.forget("k");
        assert!(engine.pattern("k").is_none());
        assert_eq!(engine.tracked(), 0);
    }
}

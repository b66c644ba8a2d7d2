use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::category::WorkCategory;
use crate::payload::Payload;

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

/// Clamp a requested priority into the supported `[1, 10]` range.
pub fn clamp_priority(priority: u8) -> u8 {
    priority.clamp(MIN_PRIORITY, MAX_PRIORITY)
}

/// Invoked exactly once with the item's outcome (including "deadline exceeded").
pub type CompletionCallback = Box<dyn FnOnce(&WorkResult) + Send + 'static>;

/// A unit of background work waiting to be dispatched.
///
/// The submitter owns the item until it is handed to the pool; from then on
/// the queue or the worker executing it does.
pub struct WorkItem {
    pub id: Uuid,
    pub category: WorkCategory,
    /// Always within `[MIN_PRIORITY, MAX_PRIORITY]`; higher runs first.
    pub priority: u8,
    pub payload: Payload,
    pub submitted_at: Instant,
    pub deadline: Option<Instant>,
    /// Retry budget for the submitter. The pool itself never retries.
    pub max_retries: u32,
    /// Where a successful result should be cached, if anywhere.
    pub cache_key: Option<String>,
    pub cache_ttl: Option<Duration>,
    /// Earliest instant the item may be admitted again (throttle backoff).
    pub not_before: Option<Instant>,
    /// Behind a mutex so that `&WorkItem` stays `Send` across a handler await.
    callback: Mutex<Option<CompletionCallback>>,
}

impl WorkItem {
    pub fn new(category: WorkCategory, priority: u8, payload: impl Into<Payload>) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            priority: clamp_priority(priority),
            payload: payload.into(),
            submitted_at: Instant::now(),
            deadline: None,
            max_retries: 0,
            cache_key: None,
            cache_ttl: None,
            not_before: None,
            callback: Mutex::new(None),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline relative to the submission instant. A timeout too large to
    /// represent means no deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = self.submitted_at.checked_add(timeout);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.cache_key = Some(key.into());
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&WorkResult) + Send + 'static,
    {
        *self.callback_slot() = Some(Box::new(callback));
        self
    }

    fn callback_slot(&mut self) -> &mut Option<CompletionCallback> {
        self.callback.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now > d)
    }

    /// Whether throttle backoff still holds the item back at `now`.
    pub fn is_ready(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |t| now >= t)
    }

    pub fn has_callback(&self) -> bool {
        crate::sync::lock(&self.callback).is_some()
    }

    /// Detach the completion callback, leaving none behind.
    pub fn take_callback(&mut self) -> Option<CompletionCallback> {
        self.callback_slot().take()
    }

    /// Hand the result to the completion callback, if one was registered.
    pub fn complete(&mut self, result: &WorkResult) {
        if let Some(callback) = self.take_callback() {
            callback(result);
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("priority", &self.priority)
            .field("payload", &self.payload)
            .field("deadline", &self.deadline)
            .field("max_retries", &self.max_retries)
            .field("cache_key", &self.cache_key)
            .field("has_callback", &self.has_callback())
            .finish()
    }
}

/// Outcome of one work item. Produced by exactly one worker; never mutated after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    pub id: Uuid,
    pub category: WorkCategory,
    pub priority: u8,
    pub success: bool,
    pub payload: Option<Payload>,
    pub error: Option<String>,
    /// Wall-clock time spent in the handler.
    pub latency: Duration,
    pub cache_hit: bool,
    /// Handler confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    pub cache_key: Option<String>,
    pub cache_ttl: Option<Duration>,
}

impl WorkResult {
    pub fn success(item: &WorkItem, payload: Payload, confidence: f64, latency: Duration) -> Self {
        Self {
            id: item.id,
            category: item.category,
            priority: item.priority,
            success: true,
            payload: Some(payload),
            error: None,
            latency,
            cache_hit: false,
            confidence: confidence.clamp(0.0, 1.0),
            cache_key: item.cache_key.clone(),
            cache_ttl: item.cache_ttl,
        }
    }

    pub fn failure(item: &WorkItem, error: impl Into<String>, latency: Duration) -> Self {
        Self {
            id: item.id,
            category: item.category,
            priority: item.priority,
            success: false,
            payload: None,
            error: Some(error.into()),
            latency,
            cache_hit: false,
            confidence: 0.0,
            cache_key: item.cache_key.clone(),
            cache_ttl: item.cache_ttl,
        }
    }

    pub fn deadline_exceeded(item: &WorkItem) -> Self {
        Self::failure(item, "deadline exceeded", Duration::ZERO)
    }

    pub fn with_cache_hit(mut self, hit: bool) -> Self {
        self.cache_hit = hit;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn priority_is_clamped() {
        assert_eq!(WorkItem::new(WorkCategory::Analysis, 0, Payload::Empty).priority, 1);
        assert_eq!(WorkItem::new(WorkCategory::Analysis, 42, Payload::Empty).priority, 10);
        assert_eq!(WorkItem::new(WorkCategory::Analysis, 7, Payload::Empty).priority, 7);
    }

    #[test]
    fn deadline_expiry() {
        let item = WorkItem::new(WorkCategory::Diagnostic, 5, "x").with_timeout(Duration::from_millis(10));
        assert!(!item.is_expired(item.submitted_at));
        assert!(item.is_expired(item.submitted_at + Duration::from_millis(11)));

        let no_deadline = WorkItem::new(WorkCategory::Diagnostic, 5, "x");
        assert!(!no_deadline.is_expired(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn oversized_timeout_means_no_deadline() {
        let item = WorkItem::new(WorkCategory::Diagnostic, 5, "x").with_timeout(Duration::MAX);
        assert_eq!(item.deadline, None);
        assert!(!item.is_expired(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn work_item_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WorkItem>();
    }

    #[test]
    fn take_callback_detaches_it() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut item = WorkItem::new(WorkCategory::Analysis, 4, "x").on_complete(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let callback = item.take_callback();
        assert!(callback.is_some());
        assert!(!item.has_callback());

        let result = WorkResult::deadline_exceeded(&item);
        item.complete(&result);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        if let Some(callback) = callback {
            callback(&result);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn readiness_honours_backoff() {
        let mut item = WorkItem::new(WorkCategory::Prediction, 3, "x");
        let now = Instant::now();
        assert!(item.is_ready(now));
        item.not_before = Some(now + Duration::from_millis(50));
        assert!(!item.is_ready(now));
        assert!(item.is_ready(now + Duration::from_millis(50)));
    }

    #[test]
    fn callback_fires_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut item = WorkItem::new(WorkCategory::Validation, 4, "x").on_complete(move |r| {
            assert!(!r.success);
            c.fetch_add(1, Ordering::SeqCst);
        });
        let result = WorkResult::deadline_exceeded(&item);
        item.complete(&result);
        item.complete(&result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!item.has_callback());
    }

    #[test]
    fn result_copies_item_identity() {
        let item = WorkItem::new(WorkCategory::Optimization, 8, "x")
            .with_cache_key("opt/api", Duration::from_secs(30));
        let result = WorkResult::success(&item, Payload::Number(1), 1.7, Duration::from_millis(3));
        assert_eq!(result.id, item.id);
        assert_eq!(result.priority, 8);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.cache_key.as_deref(), Some("opt/api"));

        let failed = WorkResult::deadline_exceeded(&item);
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("deadline exceeded"));
    }
}

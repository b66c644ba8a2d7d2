//! In-memory admission buffer ordered by descending priority.

use std::collections::VecDeque;
use std::time::Instant;

use undertow_core::WorkItem;

/// Items ordered by descending priority; equal priorities keep submission order.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    items: VecDeque<WorkItem>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert before the first item with strictly lower priority.
    ///
    /// Among equal priorities the earlier `submitted_at` stays ahead, so an
    /// item returned to the queue (buffer full, throttle backoff) regains its
    /// original place instead of moving behind later arrivals.
    pub fn add(&mut self, item: WorkItem) {
        let pos = self
            .items
            .iter()
            .position(|queued| {
                queued.priority < item.priority
                    || (queued.priority == item.priority && queued.submitted_at > item.submitted_at)
            })
            .unwrap_or(self.items.len());
        self.items.insert(pos, item);
    }

    /// Remove and return the head, or `None` when empty.
    pub fn pop(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    /// Remove the highest-priority item whose throttle backoff has elapsed.
    pub fn pop_ready(&mut self, now: Instant) -> Option<WorkItem> {
        let pos = self.items.iter().position(|item| item.is_ready(now))?;
        self.items.remove(pos)
    }

    pub fn peek_priority(&self) -> Option<u8> {
        self.items.front().map(|item| item.priority)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove everything, highest priority first.
    pub fn drain(&mut self) -> Vec<WorkItem> {
        self.items.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use undertow_core::{Payload, WorkCategory};

    use super::*;

    fn item(priority: u8, tag: &str) -> WorkItem {
        WorkItem::new(WorkCategory::Analysis, priority, Payload::Text(tag.to_string()))
    }

    fn tag(item: &WorkItem) -> String {
        match &item.payload {
            Payload::Text(s) => s.clone(),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn pops_in_descending_priority() {
        let mut q = PriorityQueue::new();
        for (p, t) in [(3, "a"), (9, "b"), (3, "c"), (9, "d"), (5, "e")] {
            q.add(item(p, t));
        }

        let order: Vec<(u8, String)> = std::iter::from_fn(|| q.pop())
            .map(|i| (i.priority, tag(&i)))
            .collect();
        assert_eq!(
            order,
            vec![
                (9, "b".into()),
                (9, "d".into()),
                (5, "e".into()),
                (3, "a".into()),
                (3, "c".into()),
            ]
        );
    }

    #[test]
    fn priorities_never_increase() {
        let mut q = PriorityQueue::new();
        for p in [1u8, 10, 4, 4, 7, 2, 10, 6, 1, 8] {
            q.add(item(p, "x"));
        }
        let mut last = u8::MAX;
        while let Some(i) = q.pop() {
            assert!(i.priority <= last);
            last = i.priority;
        }
    }

    #[test]
    fn pop_empty_returns_none() {
        let mut q = PriorityQueue::new();
        assert!(q.pop().is_none());
        assert!(q.pop_ready(Instant::now()).is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn returned_item_keeps_its_place() {
        let t0 = Instant::now();
        let stamped = |tag: &str, offset_ms: u64| {
            let mut i = item(5, tag);
            i.submitted_at = t0 + Duration::from_millis(offset_ms);
            i
        };

        let mut q = PriorityQueue::new();
        q.add(stamped("first", 0));
        q.add(stamped("second", 1));

        let head = q.pop().unwrap();
        assert_eq!(tag(&head), "first");
        q.add(stamped("third", 2));
        q.add(head);

        let order: Vec<String> = std::iter::from_fn(|| q.pop()).map(|i| tag(&i)).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn pop_ready_skips_backed_off_items() {
        let now = Instant::now();
        let mut q = PriorityQueue::new();
        let mut held = item(9, "held");
        held.not_before = Some(now + Duration::from_secs(60));
        q.add(held);
        q.add(item(2, "ready"));

        assert_eq!(q.peek_priority(), Some(9));
        let next = q.pop_ready(now).unwrap();
        assert_eq!(tag(&next), "ready");
        assert!(q.pop_ready(now).is_none());
        assert_eq!(q.len(), 1);
        assert!(q.pop_ready(now + Duration::from_secs(61)).is_some());
    }

    #[test]
    fn drain_empties_queue() {
        let mut q = PriorityQueue::new();
        q.add(item(1, "a"));
        q.add(item(2, "b"));
        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].priority, 2);
        assert!(q.is_empty());
    }
}

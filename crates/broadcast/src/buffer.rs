//! Holding area for high-priority updates that lost the throttle race.
//!
//! Drained wholesale by the periodic flush; bounded so a stalled flush
//! cannot grow it without limit.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use undertow_core::Update;

pub struct BatchBuffer {
    buffer: VecDeque<Update>,
    capacity: usize,
    batch_started: Option<Instant>,
}

impl BatchBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            batch_started: None,
        }
    }

    /// Add an update, handing it back when the buffer is full.
    ///
    /// Starts the batch timer on the first push.
    pub fn push(&mut self, update: Update) -> Result<(), Update> {
        if self.buffer.len() >= self.capacity {
            return Err(update);
        }
        if self.batch_started.is_none() {
            self.batch_started = Some(Instant::now());
        }
        self.buffer.push_back(update);
        Ok(())
    }

    /// Take everything buffered, oldest first, and reset the batch timer.
    pub fn flush(&mut self) -> Vec<Update> {
        self.batch_started = None;
        self.buffer.drain(..).collect()
    }

    /// Put updates that are still throttled back at the front, oldest first.
    ///
    /// Returns the ones that no longer fit.
    pub fn requeue(&mut self, mut updates: Vec<Update>) -> Vec<Update> {
        let room = self.capacity.saturating_sub(self.buffer.len());
        let overflow = updates.split_off(updates.len().min(room));
        for update in updates.into_iter().rev() {
            self.buffer.push_front(update);
        }
        if !self.buffer.is_empty() && self.batch_started.is_none() {
            self.batch_started = Some(Instant::now());
        }
        overflow
    }

    /// How long the oldest buffered update has been waiting.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.batch_started.map(|started| started.elapsed())
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

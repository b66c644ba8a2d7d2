use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use undertow_core::{Update, WorkCategory};

/// Predicate deciding whether a subscriber wants an update.
#[derive(Clone)]
pub enum Filter {
    Category(WorkCategory),
    MinPriority(u8),
    Custom(Arc<dyn Fn(&Update) -> bool + Send + Sync>),
}

impl Filter {
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Update) -> bool + Send + Sync + 'static,
    {
        Filter::Custom(Arc::new(predicate))
    }

    pub fn matches(&self, update: &Update) -> bool {
        match self {
            Filter::Category(category) => update.category == *category,
            Filter::MinPriority(min) => update.priority >= *min,
            Filter::Custom(predicate) => predicate(update),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Category(c) => f.debug_tuple("Category").field(c).finish(),
            Filter::MinPriority(p) => f.debug_tuple("MinPriority").field(p).finish(),
            Filter::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Registry entry for one consumer.
#[derive(Debug)]
pub struct Subscription {
    pub id: String,
    mailbox: mpsc::Sender<Update>,
    filters: Vec<Filter>,
    pub capacity: usize,
    pub last_delivered: Option<DateTime<Utc>>,
    pub delivered: u64,
    pub dropped: u64,
}

/// Result of offering an update to one mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Mailbox full; the update was dropped for this subscriber.
    Dropped,
    /// The receiving handle is gone.
    Closed,
}

impl Subscription {
    pub(crate) fn new(id: String, filters: Vec<Filter>, capacity: usize) -> (Self, mpsc::Receiver<Update>) {
        let (tx, rx) = mpsc::channel(capacity);
        let subscription = Self {
            id,
            mailbox: tx,
            filters,
            capacity,
            last_delivered: None,
            delivered: 0,
            dropped: 0,
        };
        (subscription, rx)
    }

    /// Any passing filter admits; no filters admit everything.
    pub fn accepts(&self, update: &Update) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|f| f.matches(update))
    }

    /// Non-blocking enqueue into the mailbox.
    pub(crate) fn offer(&mut self, update: &Update) -> Delivery {
        match self.mailbox.try_send(update.clone()) {
            Ok(()) => {
                self.delivered += 1;
                self.last_delivered = Some(Utc::now());
                Delivery::Delivered
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped += 1;
                Delivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped += 1;
                Delivery::Closed
            }
        }
    }

    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            id: self.id.clone(),
            filters: self.filters.len(),
            capacity: self.capacity,
            queued: self.capacity - self.mailbox.capacity(),
            delivered: self.delivered,
            dropped: self.dropped,
            last_delivered: self.last_delivered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionStats {
    pub id: String,
    pub filters: usize,
    pub capacity: usize,
    /// Updates sitting in the mailbox.
    pub queued: usize,
    pub delivered: u64,
    pub dropped: u64,
    pub last_delivered: Option<DateTime<Utc>>,
}

/// Receiving side of a subscription.
#[derive(Debug)]
pub struct SubscriptionHandle {
    pub id: String,
    receiver: mpsc::Receiver<Update>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: String, receiver: mpsc::Receiver<Update>) -> Self {
        Self { id, receiver }
    }

    /// Next update; `None` once unsubscribed or the broadcaster shut down.
    pub async fn recv(&mut self) -> Option<Update> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Update> {
        self.receiver.try_recv().ok()
    }

    /// Everything currently in the mailbox.
    pub fn drain(&mut self) -> Vec<Update> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

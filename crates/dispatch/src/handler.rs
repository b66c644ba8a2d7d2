//! Category handler contract and the table the workers resolve handlers from.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::warn;
use undertow_core::{Payload, WorkCategory, WorkItem, WorkResult};

use crate::error::DispatchError;

/// Error returned by a category handler.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// What a handler produced for one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutput {
    pub payload: Payload,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Whether the handler answered from a cache of its own.
    pub cache_hit: bool,
}

impl HandlerOutput {
    pub fn new(payload: Payload, confidence: f64) -> Self {
        Self {
            payload,
            confidence,
            cache_hit: false,
        }
    }

    pub fn cached(mut self) -> Self {
        self.cache_hit = true;
        self
    }
}

impl From<Payload> for HandlerOutput {
    fn from(payload: Payload) -> Self {
        Self::new(payload, 1.0)
    }
}

/// Executes the work of one category.
///
/// Supplied by the analysis/prediction/optimization engines. Handlers are
/// expected to be short-running: nothing preempts a handler that hangs.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn execute(&self, payload: &Payload) -> Result<HandlerOutput, HandlerError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "handler"
    }
}

type BoxedHandlerFn = Box<
    dyn Fn(Payload) -> Pin<Box<dyn Future<Output = Result<HandlerOutput, HandlerError>> + Send>>
        + Send
        + Sync,
>;

/// Adapts an async closure into a [`WorkHandler`].
pub struct FnHandler {
    name: String,
    func: BoxedHandlerFn,
}

impl FnHandler {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerOutput, HandlerError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(move |payload| Box::pin(func(payload))),
        }
    }
}

#[async_trait]
impl WorkHandler for FnHandler {
    async fn execute(&self, payload: &Payload) -> Result<HandlerOutput, HandlerError> {
        (self.func)(payload.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Category → handler resolution table.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<WorkCategory, Arc<dyn WorkHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, category: WorkCategory, handler: Arc<dyn WorkHandler>) -> Self {
        self.handlers.insert(category, handler);
        self
    }

    /// Register an async closure for a category.
    ///
    /// ```ignore
    /// let table = HandlerTable::new().register_fn(WorkCategory::Analysis, |payload| async move {
    ///     Ok(HandlerOutput::from(payload))
    /// });
    /// ```
    pub fn register_fn<F, Fut>(self, category: WorkCategory, func: F) -> Self
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerOutput, HandlerError>> + Send + 'static,
    {
        let handler = FnHandler::new(category.as_str(), func);
        self.register(category, Arc::new(handler))
    }

    pub fn get(&self, category: WorkCategory) -> Option<Arc<dyn WorkHandler>> {
        self.handlers.get(&category).cloned()
    }

    pub fn categories(&self) -> Vec<WorkCategory> {
        let mut categories: Vec<_> = self.handlers.keys().copied().collect();
        categories.sort();
        categories
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler for `item` and turn every outcome into a result.
    ///
    /// Missing handlers, handler errors and handler panics all become failed
    /// results, so each item yields exactly one [`WorkResult`].
    pub async fn run(&self, item: &WorkItem) -> WorkResult {
        let started = Instant::now();
        let Some(handler) = self.get(item.category) else {
            let err = DispatchError::UnrecognizedCategory(item.category);
            return WorkResult::failure(item, err.to_string(), started.elapsed());
        };

        let outcome = AssertUnwindSafe(handler.execute(&item.payload))
            .catch_unwind()
            .await;
        let latency = started.elapsed();

        match outcome {
            Ok(Ok(output)) => WorkResult::success(item, output.payload, output.confidence, latency)
                .with_cache_hit(output.cache_hit),
            Ok(Err(e)) => {
                WorkResult::failure(item, DispatchError::Handler(e.to_string()).to_string(), latency)
            }
            Err(_) => {
                warn!(handler = handler.name(), item = %item.id, "handler panicked");
                WorkResult::failure(
                    item,
                    DispatchError::Handler("handler panicked".into()).to_string(),
                    latency,
                )
            }
        }
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("categories", &self.categories())
            .finish()
    }
}

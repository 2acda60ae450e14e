//! # Hook
//!
//! A priority-ordered, mutable chain of handlers over one event type.
//!
//! Handlers are kept stable-sorted ascending by priority. A named handler
//! (non-empty id) can be replaced by binding another handler with the same id,
//! or removed with [`Hook::unbind`]; anonymous handlers stay until
//! [`Hook::unbind_all`].
//!
//! [`Hook::trigger`] snapshots the list under a read lock and releases it
//! before any handler runs, so a handler may trigger the same hook again (or
//! bind new handlers) without deadlocking. Changes made while a trigger is in
//! flight are only visible to later triggers.
//!
//! A nested trigger installs its own chain on the event and puts the enclosing
//! one back when it finishes or when its future is dropped.

use crate::error::BoxError;
use crate::event::Resolver;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// The shared function type stored by every handler.
pub type HandlerFunc<T> =
    Arc<dyn for<'a> Fn(&'a mut T) -> BoxFuture<'a, Result<(), BoxError>> + Send + Sync>;

/// Convert a closure into a [`HandlerFunc`].
///
/// ```rust,ignore
/// let log = handler_fn(|e: &mut MyEvent| Box::pin(async move {
///     tracing::info!("before");
///     let result = e.next().await;
///     tracing::info!("after");
///     result
/// }));
/// ```
pub fn handler_fn<T, F>(f: F) -> HandlerFunc<T>
where
    F: for<'a> Fn(&'a mut T) -> BoxFuture<'a, Result<(), BoxError>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A unit of behaviour bound to a [`Hook`].
pub struct Handler<T> {
    /// Identifier of the handler. Empty means anonymous.
    pub id: String,
    /// The function to run.
    pub func: HandlerFunc<T>,
    /// Lower values run first.
    pub priority: i32,
}

impl<T> Handler<T> {
    /// Create an anonymous handler with priority 0.
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut T) -> BoxFuture<'a, Result<(), BoxError>> + Send + Sync + 'static,
    {
        Self::from_func(Arc::new(f))
    }

    /// Create an anonymous handler from an already shared function.
    pub fn from_func(func: HandlerFunc<T>) -> Self {
        Self {
            id: String::new(),
            func,
            priority: 0,
        }
    }

    /// Set the id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether the handler can be individually removed.
    pub fn is_anonymous(&self) -> bool {
        self.id.is_empty()
    }
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            func: Arc::clone(&self.func),
            priority: self.priority,
        }
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// An ordered, concurrency-safe collection of handlers for one event type.
pub struct Hook<T> {
    handlers: RwLock<Vec<Handler<T>>>,
}

impl<T> Default for Hook<T> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<T> fmt::Debug for Hook<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("handlers", &*self.handlers.read().unwrap_or_else(PoisonError::into_inner))
            .finish()
    }
}

impl<T: Resolver> Hook<T> {
    /// Create an empty hook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, or replace the one bound with the same id.
    ///
    /// A replaced handler keeps its slot; the list is then stable-sorted by
    /// priority. Returns the handler id (empty for anonymous handlers).
    pub fn bind(&self, handler: Handler<T>) -> String {
        let id = handler.id.clone();
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);

        let existing = if id.is_empty() {
            None
        } else {
            handlers.iter().position(|h| h.id == id)
        };
        match existing {
            Some(index) => handlers[index] = handler,
            None => handlers.push(handler),
        }

        // Vec::sort_by_key is stable, equal priorities keep registration order.
        handlers.sort_by_key(|h| h.priority);

        id
    }

    /// Register an anonymous handler with priority 0.
    pub fn bind_func<F>(&self, f: F) -> String
    where
        F: for<'a> Fn(&'a mut T) -> BoxFuture<'a, Result<(), BoxError>> + Send + Sync + 'static,
    {
        self.bind(Handler::new(f))
    }

    /// Remove every named handler whose id is listed. Empty ids are ignored.
    pub fn unbind<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            let id = id.as_ref();
            if id.is_empty() {
                continue;
            }
            handlers.retain(|h| h.id != id);
        }
    }

    /// Remove every handler, anonymous ones included.
    pub fn unbind_all(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of bound handlers.
    pub fn length(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// A copy of the bound handlers in execution order.
    pub fn handlers(&self) -> Vec<Handler<T>> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Run the chain against `event`.
    pub async fn trigger(&self, event: &mut T) -> Result<(), BoxError> {
        self.trigger_with(event, Vec::new()).await
    }

    /// Run the chain against `event`, followed by `one_off` handlers.
    ///
    /// One-off handlers always run after every bound handler, in the given
    /// order and regardless of priority. The result is whatever the first
    /// handler of the resolved chain returns.
    pub async fn trigger_with(
        &self,
        event: &mut T,
        one_off: Vec<HandlerFunc<T>>,
    ) -> Result<(), BoxError> {
        let chain: Arc<[HandlerFunc<T>]> = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            handlers
                .iter()
                .map(|h| Arc::clone(&h.func))
                .chain(one_off)
                .collect()
        };

        let _outer = event.continuation().enter(chain);
        event.next().await
    }
}

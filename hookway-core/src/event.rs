//! # Continuation Carrier
//!
//! Every event that flows through a [`Hook`] embeds an [`Event`] value. It holds
//! the resolved chain and a cursor into it; [`Resolver::next`] runs the handler
//! right after the one currently executing, against the same event.
//!
//! This is what gives handlers their "onion" shape: a handler may run code
//! before and after `next().await`, skip it entirely to truncate the chain,
//! call it again to re-run its successor, or replace whatever the downstream
//! handlers returned.
//!
//! The cursor is rewound by a drop guard, so a continuation future dropped
//! mid-run (a timeout around a nested trigger, for instance) leaves the event
//! positioned where it was before the call.
//!
//! [`Hook`]: crate::Hook

use crate::error::BoxError;
use crate::hook::HandlerFunc;
use futures::future::{self, BoxFuture};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The resolved chain plus the index of the handler `next()` will run.
struct Frame<T> {
    chain: Arc<[HandlerFunc<T>]>,
    cursor: usize,
}

impl<T> Clone for Frame<T> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            cursor: self.cursor,
        }
    }
}

/// The handler chain an event is being dispatched through.
pub struct Event<T> {
    frame: Arc<Mutex<Frame<T>>>,
}

impl<T> Event<T> {
    /// Create an empty continuation; `next()` on it is a no-op.
    pub fn new() -> Self {
        Self {
            frame: Arc::new(Mutex::new(Frame {
                chain: Arc::from(Vec::new()),
                cursor: 0,
            })),
        }
    }

    /// Number of handlers after the one currently running.
    pub fn remaining(&self) -> usize {
        let frame = self.lock();
        frame.chain.len().saturating_sub(frame.cursor)
    }

    fn lock(&self) -> MutexGuard<'_, Frame<T>> {
        self.frame.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `chain` with the cursor on its first handler.
    ///
    /// The previous chain and cursor come back when the returned guard drops.
    pub(crate) fn enter(&self, chain: Arc<[HandlerFunc<T>]>) -> Rewind<T> {
        let mut frame = self.lock();
        let previous = std::mem::replace(
            &mut *frame,
            Frame {
                chain: Arc::clone(&chain),
                cursor: 0,
            },
        );
        Rewind {
            cell: Arc::clone(&self.frame),
            installed: chain,
            previous: Some(previous),
        }
    }

    /// Take the handler under the cursor and move the cursor past it.
    ///
    /// The cursor moves back when the returned guard drops.
    pub(crate) fn advance(&self) -> Option<(HandlerFunc<T>, Rewind<T>)> {
        let mut frame = self.lock();
        let handler = Arc::clone(frame.chain.get(frame.cursor)?);
        let previous = frame.clone();
        frame.cursor += 1;
        Some((
            handler,
            Rewind {
                cell: Arc::clone(&self.frame),
                installed: Arc::clone(&previous.chain),
                previous: Some(previous),
            },
        ))
    }
}

/// Restores a saved [`Frame`] on drop.
///
/// Nothing is restored once the event has already moved back to another
/// chain, so guards may drop in any order.
pub(crate) struct Rewind<T> {
    cell: Arc<Mutex<Frame<T>>>,
    installed: Arc<[HandlerFunc<T>]>,
    previous: Option<Frame<T>>,
}

impl<T> Drop for Rewind<T> {
    fn drop(&mut self) {
        let mut frame = self.cell.lock().unwrap_or_else(PoisonError::into_inner);
        if !Arc::ptr_eq(&frame.chain, &self.installed) {
            return;
        }
        if let Some(previous) = self.previous.take() {
            *frame = previous;
        }
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// An event type that can take part in a hook chain.
///
/// Implementors only point at their embedded [`Event`]; `next` is provided.
///
/// ```rust,ignore
/// struct SaveEvent {
///     event: Event<SaveEvent>,
///     record_id: String,
/// }
///
/// impl Resolver for SaveEvent {
///     fn continuation(&mut self) -> &mut Event<Self> {
///         &mut self.event
///     }
/// }
/// ```
#[diagnostic::on_unimplemented(
    message = "`{Self}` cannot be dispatched through a hook chain",
    label = "missing `Resolver` implementation",
    note = "Embed an `Event<{Self}>` field and implement `Resolver::continuation`, \
            or use `#[derive(Resolver)]`."
)]
pub trait Resolver: Send + Sized + 'static {
    /// The continuation embedded in this event.
    fn continuation(&mut self) -> &mut Event<Self>;

    /// Run the handler that follows the one currently executing.
    ///
    /// Calling it again re-runs that same successor. Resolves to `Ok(())`
    /// immediately when the current handler is the last one.
    fn next(&mut self) -> BoxFuture<'_, Result<(), BoxError>> {
        match self.continuation().advance() {
            Some((handler, rewind)) => Box::pin(async move {
                let result = handler(self).await;
                drop(rewind);
                result
            }),
            None => Box::pin(future::ready(Ok(()))),
        }
    }
}

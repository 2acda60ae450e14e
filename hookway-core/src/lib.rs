//! # hookway-core
//!
//! Core primitives for the Hookway dispatch framework.
//!
//! This crate has minimal dependencies and is meant to be imported by code
//! that only needs to declare events and hook into them, without pulling in
//! the HTTP router or the realtime broker from `hookway-std`.
//!
//! # Building Blocks
//!
//! ## Continuation ([`Event`], [`Resolver`])
//!
//! Every dispatchable event embeds an [`Event`] holding the rest of the chain.
//! A handler decides on its own whether to call [`Resolver::next`], and what
//! to do with the downstream result.
//!
//! ## Hook ([`Hook`], [`Handler`])
//!
//! A priority-ordered, mutable, concurrency-safe list of handlers for one
//! event type. Triggering snapshots the list, so handlers may trigger the same
//! hook recursively.
//!
//! ## Tagged views ([`TaggedHook`])
//!
//! Filtering overlays that register handlers on a shared hook but only run them
//! for events whose [`Tagger::tags`] intersect the view's tags.
//!
//! ## Store ([`Store`])
//!
//! A small concurrency-safe map used for per-request and per-client state.

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

mod error;
mod event;
mod hook;
mod store;
mod tagged;

// Re-exports
pub use error::{BoxError, find_source};
pub use event::{Event, Resolver};
pub use hook::{Handler, HandlerFunc, Hook, handler_fn};
pub use store::Store;
pub use tagged::{TaggedHook, Tagger};

/// Boxed future returned by every handler function.
pub use futures::future::BoxFuture;

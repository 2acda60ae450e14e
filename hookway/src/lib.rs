//! # hookway - Hook Chains for Request Dispatch
//!
//! `hookway` dispatches events through priority-ordered, mutable chains of
//! handlers. Every handler receives the event and decides on its own whether
//! to continue the chain, so middlewares wrap whatever runs after them.
//!
//! On top of the chain it provides an HTTP route tree that composes group and
//! route middlewares into one chain per route, a request binder, a client-safe
//! error envelope and an in-memory realtime subscription broker.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hookway::prelude::*;
//!
//! #[derive(Resolver, Default)]
//! struct SaveEvent {
//!     event: Event<SaveEvent>,
//!     record_id: String,
//! }
//!
//! let on_save: Hook<SaveEvent> = Hook::new();
//! on_save.bind(Handler::new(|e: &mut SaveEvent| Box::pin(async move {
//!     tracing::info!(id = %e.record_id, "saving");
//!     e.next().await
//! })).with_id("audit"));
//!
//! on_save.trigger(&mut SaveEvent::default()).await?;
//! ```

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

pub use hookway_core::{
    // Errors
    BoxError,
    BoxFuture,
    // Continuation
    Event,
    // Hook
    Handler,
    HandlerFunc,
    Hook,
    Resolver,
    // State
    Store,
    // Tagged views
    TaggedHook,
    Tagger,
    find_source,
    handler_fn,
};

pub use hookway_std::{api_error, binder, router, subscriptions, testing, text_field};

pub use hookway_std::api_error::{ApiError, to_api_error};
pub use hookway_std::router::{Mux, RequestEvent, Router, RouterError, RouterGroup};
pub use hookway_std::subscriptions::{Broker, Client, Message};

/// Prelude module - common imports for Hookway.
///
/// # Usage
///
/// ```rust,ignore
/// use hookway::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Errors
        ApiError,
        BoxError,
        BoxFuture,
        // Core
        Event,
        Handler,
        Hook,
        Resolver,
        // Routing
        RequestEvent,
        Router,
        TaggedHook,
        Tagger,
    };

    #[cfg(feature = "macros")]
    pub use crate::Bind;
}

#[cfg(feature = "macros")]
pub use hookway_macros::{Bind, Resolver};

//! # HTTP Routing
//!
//! Route composition over [`Hook`](hookway_core::Hook) chains:
//!
//! - [`RouterGroup`] / [`Route`] - the prefix tree with per-scope middlewares
//!   and exclusion sets
//! - [`Router`] / [`Mux`] - compile the tree and dispatch requests
//! - [`RequestEvent`] - the default event handed to every handler
//! - [`ResponseWriter`] and friends - tracked, capability-aware writers
//! - [`RereadableBody`] - a request body that can be read more than once
//!
//! ```rust,ignore
//! let mut router = Router::new();
//! router.bind(Handler::new(log_requests).with_id("log"));
//!
//! let api = router.group("/api");
//! api.get("/users/{id}", |e: &mut RequestEvent| Box::pin(async move {
//!     let id = e.path_value("id").unwrap_or_default().to_string();
//!     e.json(StatusCode::OK, &serde_json::json!({ "id": id }))
//! }));
//!
//! let mux = router.build_mux()?;
//! let response = mux.serve(request).await;
//! ```

mod body;
mod event;
mod group;
mod mux;
mod response;

pub use body::RereadableBody;
pub use event::{RequestEvent, StoreValue};
pub use group::{Route, RouterGroup};
pub use mux::{
    Cleanup, EventFactory, HttpEvent, Mux, PathParams, Router, RouterError, error_handler,
};
pub use response::{
    BufferedResponse, Connection, ResponseSink, ResponseWriter, TrackedResponse, WriteStatus,
    WriterError,
};

//! # hookway-std
//!
//! Standard building blocks on top of `hookway-core`.
//!
//! This crate provides:
//! - **HTTP routing**: [`router::Router`], [`router::RouterGroup`], [`router::Mux`]
//! - **Request events**: [`router::RequestEvent`] and its tracked response writer
//! - **Request binding**: [`binder`] for JSON and urlencoded bodies
//! - **Error normalization**: [`api_error::ApiError`] and [`api_error::to_api_error`]
//! - **Realtime subscriptions**: [`subscriptions::Broker`], [`subscriptions::Client`]
//! - **Testing helpers**: [`testing`]

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

// Re-export core primitives
pub use hookway_core;

// Modules
pub mod api_error;
pub mod binder;
pub mod router;
pub mod subscriptions;
pub mod testing;

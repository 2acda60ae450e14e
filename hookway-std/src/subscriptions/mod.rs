//! # Realtime Subscriptions
//!
//! Best-effort, in-memory pub/sub state for streaming connections.
//!
//! A [`Client`] is created per connection and registered in the [`Broker`].
//! Producers pick the clients subscribed to a topic (usually batch by batch
//! via [`Broker::chunked_clients`]) and [`Client::send`] a [`Message`]; the
//! connection writer drains [`Client::recv`] and writes each message with
//! [`Message::write_sse`].

mod broker;
mod client;
mod message;

pub use broker::{Broker, BrokerError};
pub use client::{CLIENT_ID_LENGTH, Client, OPTIONS_PARAM, SubscriptionOptions};
pub use message::Message;

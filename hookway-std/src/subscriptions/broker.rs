//! The in-memory client registry.

use crate::subscriptions::client::Client;
use hookway_core::Store;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by the [`Broker`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// No client is registered under the id.
    #[error("no client associated with connection id {0:?}")]
    NotRegistered(String),
}

/// Registry of the realtime clients of this process.
///
/// Every operation is individually atomic. Enumeration returns copies, so
/// callers can iterate without holding the registry lock.
#[derive(Debug, Default)]
pub struct Broker {
    clients: Store<String, Arc<Client>>,
}

impl Broker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every registered client, keyed by id.
    pub fn clients(&self) -> HashMap<String, Arc<Client>> {
        self.clients.get_all()
    }

    /// The registered clients split into batches of at most `size` clients.
    /// A zero size is treated as one.
    pub fn chunked_clients(&self, size: usize) -> Vec<Vec<Arc<Client>>> {
        self.clients
            .values()
            .chunks(size.max(1))
            .map(<[Arc<Client>]>::to_vec)
            .collect()
    }

    /// Number of registered clients.
    pub fn total_clients(&self) -> usize {
        self.clients.length()
    }

    /// Look a client up by id.
    pub fn client_by_id(&self, id: &str) -> Result<Arc<Client>, BrokerError> {
        self.clients
            .get(&id.to_string())
            .ok_or_else(|| BrokerError::NotRegistered(id.to_string()))
    }

    /// Add a client. A different client already registered under the same
    /// id is discarded.
    pub fn register(&self, client: Arc<Client>) {
        tracing::debug!(client = %client.id(), "client registered");
        let id = client.id().to_string();
        let replaced = self.clients.set(id, Arc::clone(&client));
        if let Some(replaced) = replaced.filter(|old| !Arc::ptr_eq(old, &client)) {
            replaced.discard();
            tracing::debug!(client = %client.id(), "replaced client discarded");
        }
    }

    /// Discard and remove a client. Unknown ids are ignored.
    pub fn unregister(&self, id: &str) {
        if let Some(client) = self.clients.remove(&id.to_string()) {
            client.discard();
            tracing::debug!(client = %id, "client unregistered");
        }
    }
}

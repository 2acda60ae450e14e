//! Realtime client state.

use crate::subscriptions::message::Message;
use hookway_core::Store;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Length of generated client ids.
pub const CLIENT_ID_LENGTH: usize = 40;

/// Query parameter of a topic carrying its JSON encoded options.
pub const OPTIONS_PARAM: &str = "options";

/// Per-subscription options, e.g. `posts?options={"query":{"expand":"author"}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionOptions {
    /// Query parameters to apply when resolving the subscription.
    pub query: HashMap<String, String>,
    /// Headers to apply when resolving the subscription.
    pub headers: HashMap<String, String>,
}

#[derive(Deserialize, Default)]
struct RawOptions {
    #[serde(default)]
    query: Map<String, Value>,
    #[serde(default)]
    headers: Map<String, Value>,
}

impl SubscriptionOptions {
    /// Extract the options embedded in `topic`. Malformed options are
    /// ignored.
    pub fn from_topic(topic: &str) -> Self {
        let raw = topic
            .split_once('?')
            .and_then(|(_, query)| {
                query.split('&').find_map(|pair| {
                    let (key, value) = pair.split_once('=')?;
                    (key == OPTIONS_PARAM).then_some(value)
                })
            })
            .and_then(|value| {
                urlencoding::decode(&value.replace('+', " "))
                    .ok()
                    .map(|v| v.into_owned())
            })
            .and_then(|json| serde_json::from_str::<RawOptions>(&json).ok())
            .unwrap_or_default();

        Self {
            query: stringify(raw.query),
            headers: stringify(raw.headers),
        }
    }
}

fn stringify(values: Map<String, Value>) -> HashMap<String, String> {
    values
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (key, text)
        })
        .collect()
}

/// One realtime connection: its subscriptions, a context store and a
/// single-slot delivery queue.
///
/// Once [`Client::discard`] is called, sends become no-ops and
/// [`Client::recv`] yields `None`.
pub struct Client {
    id: String,
    subscriptions: RwLock<HashMap<String, SubscriptionOptions>>,
    store: Store<String, Arc<dyn Any + Send + Sync>>,
    sender: mpsc::Sender<Message>,
    receiver: Mutex<mpsc::Receiver<Message>>,
    discarded: CancellationToken,
}

impl Client {
    /// Create a client with a random id.
    pub fn new() -> Self {
        Self::with_id(random_id())
    }

    /// Create a client with a host-chosen id, e.g. a resumed connection.
    pub fn with_id(id: impl Into<String>) -> Self {
        let (sender, receiver) = mpsc::channel(1);
        Self {
            id: id.into(),
            subscriptions: RwLock::new(HashMap::new()),
            store: Store::new(),
            sender,
            receiver: Mutex::new(receiver),
            discarded: CancellationToken::new(),
        }
    }

    /// The unique client id.
    pub fn id(&self) -> &str {
        &self.id
    }

    // ---- subscriptions -----------------------------------------------------

    /// Add subscriptions. Empty topics are ignored; a repeated topic has its
    /// options refreshed.
    pub fn subscribe<I, S>(&self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for topic in topics {
            let topic = topic.into();
            if topic.is_empty() {
                continue;
            }
            let options = SubscriptionOptions::from_topic(&topic);
            subs.insert(topic, options);
        }
    }

    /// Remove the listed subscriptions. An empty list removes all of them.
    pub fn unsubscribe<I, S>(&self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut any = false;
        for topic in topics {
            any = true;
            subs.remove(topic.as_ref());
        }
        if !any {
            subs.clear();
        }
    }

    /// Whether the client is subscribed to exactly `topic`.
    pub fn has_subscription(&self, topic: &str) -> bool {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(topic)
    }

    /// Copy of the subscriptions whose topic starts with one of `prefixes`.
    /// No prefix returns every subscription.
    pub fn subscriptions(&self, prefixes: &[&str]) -> HashMap<String, SubscriptionOptions> {
        let subs = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        subs.iter()
            .filter(|(topic, _)| {
                prefixes.is_empty() || prefixes.iter().any(|p| topic.starts_with(p))
            })
            .map(|(topic, options)| (topic.clone(), options.clone()))
            .collect()
    }

    // ---- context store -----------------------------------------------------

    /// Store a context value.
    pub fn set<V: Any + Send + Sync>(&self, key: impl Into<String>, value: V) {
        self.store.set(key.into(), Arc::new(value));
    }

    /// Remove a context value.
    pub fn unset(&self, key: &str) {
        self.store.remove(&key.to_string());
    }

    /// A typed context value.
    pub fn get<V: Clone + 'static>(&self, key: &str) -> Option<V> {
        self.store
            .get(&key.to_string())
            .and_then(|value| value.downcast_ref::<V>().cloned())
    }

    // ---- delivery ----------------------------------------------------------

    /// Queue a message, waiting for the single slot to free up.
    ///
    /// Returns `false` without blocking further once the client is
    /// discarded.
    pub async fn send(&self, msg: Message) -> bool {
        if self.is_discarded() {
            return false;
        }
        tokio::select! {
            _ = self.discarded.cancelled() => false,
            sent = self.sender.send(msg) => sent.is_ok(),
        }
    }

    /// Wait for the next queued message. `None` once discarded.
    pub async fn recv(&self) -> Option<Message> {
        if self.is_discarded() {
            return None;
        }
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            _ = self.discarded.cancelled() => None,
            msg = receiver.recv() => msg,
        }
    }

    /// Mark the client as gone. Pending and future deliveries are dropped.
    pub fn discard(&self) {
        if !self.discarded.is_cancelled() {
            tracing::debug!(client = %self.id, "client discarded");
        }
        self.discarded.cancel();
    }

    /// Whether [`Client::discard`] was called.
    pub fn is_discarded(&self) -> bool {
        self.discarded.is_cancelled()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscriptions = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("subscriptions", &subscriptions)
            .field("discarded", &self.is_discarded())
            .finish_non_exhaustive()
    }
}

fn random_id() -> String {
    let mut id = String::with_capacity(CLIENT_ID_LENGTH + 24);
    while id.len() < CLIENT_ID_LENGTH {
        id.push_str(Uuid::new_v4().simple().to_string().as_str());
    }
    id.truncate(CLIENT_ID_LENGTH);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn ids_are_unique_and_sized() {
        let a = Client::new();
        let b = Client::new();
        assert_eq!(a.id().len(), CLIENT_ID_LENGTH);
        assert!(a.id().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn subscribe_and_unsubscribe() {
        let client = Client::new();
        client.subscribe(["", "posts", "posts/abc", "users"]);
        assert!(client.has_subscription("posts"));
        assert!(!client.has_subscription(""));
        assert_eq!(client.subscriptions(&[]).len(), 3);
        assert_eq!(client.subscriptions(&["posts"]).len(), 2);
        assert_eq!(client.subscriptions(&["missing", "users"]).len(), 1);

        client.unsubscribe(["posts"]);
        assert!(!client.has_subscription("posts"));
        assert!(client.has_subscription("posts/abc"));

        client.unsubscribe(Vec::<String>::new());
        assert!(client.subscriptions(&[]).is_empty());
    }

    #[test]
    fn subscription_options_are_parsed_from_the_topic() {
        let raw = r#"{"query":{"expand":"author","page":2},"headers":{"x-token":"abc"}}"#;
        let topic = format!("posts?{OPTIONS_PARAM}={}", urlencoding::encode(raw));

        let client = Client::new();
        client.subscribe([topic.clone(), "plain".to_string()]);

        let subs = client.subscriptions(&[]);
        let options = &subs[&topic];
        assert_eq!(options.query["expand"], "author");
        assert_eq!(options.query["page"], "2");
        assert_eq!(options.headers["x-token"], "abc");
        assert_eq!(subs["plain"], SubscriptionOptions::default());

        let broken = SubscriptionOptions::from_topic("posts?options=%7Bnot-json");
        assert_eq!(broken, SubscriptionOptions::default());
    }

    #[test]
    fn context_store() {
        let client = Client::new();
        client.set("auth", "token".to_string());
        assert_eq!(client.get::<String>("auth").as_deref(), Some("token"));
        client.unset("auth");
        assert_eq!(client.get::<String>("auth"), None);
    }

    #[tokio::test]
    async fn single_slot_delivery() {
        let client = Arc::new(Client::new());
        assert!(client.send(Message::new("a", "1")).await);

        // the slot is full, so a second send waits for the reader
        let sender = Arc::clone(&client);
        let pending = tokio::spawn(async move { sender.send(Message::new("b", "2")).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        assert_eq!(client.recv().await.unwrap().name, "a");
        assert!(pending.await.unwrap());
        assert_eq!(client.recv().await.unwrap().name, "b");
    }

    #[tokio::test]
    async fn discard_unblocks_senders_and_receivers() {
        let client = Arc::new(Client::new());
        client.send(Message::new("a", "1")).await;

        let sender = Arc::clone(&client);
        let pending = tokio::spawn(async move { sender.send(Message::new("b", "2")).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        client.discard();
        assert!(!pending.await.unwrap());
        assert!(client.is_discarded());
        assert!(client.recv().await.is_none());
        assert!(!client.send(Message::new("c", "3")).await);
    }
}

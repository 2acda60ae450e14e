#![allow(dead_code)]

use hookway::{Event, Handler, Resolver, Tagger};
use std::sync::{Arc, Mutex};

// ============================================================================
// Test Event Types
// ============================================================================

#[derive(Resolver, Default)]
pub struct SaveEvent {
    pub event: Event<SaveEvent>,
    pub collection: String,
    pub seen: Vec<String>,
}

impl SaveEvent {
    pub fn in_collection(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            ..Self::default()
        }
    }
}

impl Tagger for SaveEvent {
    fn tags(&self) -> Vec<String> {
        vec![self.collection.clone()]
    }
}

// ============================================================================
// Test Handlers
// ============================================================================

/// A named handler that records its name on the event and continues.
pub fn marking(id: &'static str, priority: i32) -> Handler<SaveEvent> {
    Handler::new(move |e: &mut SaveEvent| {
        e.seen.push(id.to_string());
        e.next()
    })
    .with_id(id)
    .with_priority(priority)
}

/// A shared order log for handlers that can't reach the event.
pub type OrderLog = Arc<Mutex<Vec<String>>>;

pub fn order_log() -> OrderLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &OrderLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

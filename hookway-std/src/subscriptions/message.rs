//! Realtime messages.

use bytes::Bytes;
use std::io::{self, Write};

/// A named payload delivered to subscribed clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Event name, usually the subscription topic.
    pub name: String,
    /// Raw payload, typically JSON.
    pub data: Bytes,
}

impl Message {
    /// Create a message.
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Write the server-sent-events frame of this message:
    /// `id:<id>\nevent:<name>\ndata:<payload>\n\n`.
    pub fn write_sse<W: Write + ?Sized>(&self, w: &mut W, event_id: &str) -> io::Result<()> {
        w.write_all(b"id:")?;
        w.write_all(event_id.as_bytes())?;
        w.write_all(b"\nevent:")?;
        w.write_all(self.name.as_bytes())?;
        w.write_all(b"\ndata:")?;
        w.write_all(&self.data)?;
        w.write_all(b"\n\n")
    }
}

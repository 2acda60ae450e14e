//! Rereadable request body.

use bytes::Bytes;
use std::fmt;
use std::io::{self, Read};

/// A request body that can be read in full more than once.
///
/// Bytes pulled from the source are kept in an internal buffer. Reaching the
/// end of the stream rewinds the reader, so the next read replays the body
/// from the start. [`RereadableBody::rewind`] does the same on demand for
/// readers that stop before end-of-stream; the unread remainder of the source
/// is still served afterwards.
pub struct RereadableBody {
    source: Box<dyn Read + Send>,
    buffer: Vec<u8>,
    pos: usize,
    exhausted: bool,
}

impl RereadableBody {
    /// Wrap an arbitrary byte source.
    pub fn new(source: impl Read + Send + 'static) -> Self {
        Self {
            source: Box::new(source),
            buffer: Vec::new(),
            pos: 0,
            exhausted: false,
        }
    }

    /// An empty body.
    pub fn empty() -> Self {
        Self::from(Bytes::new())
    }

    /// Move the read cursor back to the first byte.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Read the whole body and rewind.
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        self.rewind();
        let mut out = Vec::new();
        self.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl Read for RereadableBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.pos < self.buffer.len() {
            let n = (&self.buffer[self.pos..]).read(buf)?;
            self.pos += n;
            return Ok(n);
        }

        if self.exhausted {
            self.rewind();
            return Ok(0);
        }

        let n = self.source.read(buf)?;
        if n == 0 {
            self.exhausted = true;
            self.rewind();
            return Ok(0);
        }
        self.buffer.extend_from_slice(&buf[..n]);
        self.pos = self.buffer.len();
        Ok(n)
    }
}

impl From<Bytes> for RereadableBody {
    fn from(bytes: Bytes) -> Self {
        Self::new(io::Cursor::new(bytes))
    }
}

impl From<Vec<u8>> for RereadableBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(io::Cursor::new(bytes))
    }
}

impl From<&'static str> for RereadableBody {
    fn from(text: &'static str) -> Self {
        Self::new(text.as_bytes())
    }
}

impl Default for RereadableBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for RereadableBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RereadableBody")
            .field("buffered", &self.buffer.len())
            .field("pos", &self.pos)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_reads_replay_the_body() {
        let mut body = RereadableBody::from("hello world");

        let mut first = String::new();
        body.read_to_string(&mut first).unwrap();
        let mut second = String::new();
        body.read_to_string(&mut second).unwrap();

        assert_eq!(first, "hello world");
        assert_eq!(second, "hello world");
    }

    #[test]
    fn manual_rewind_after_partial_read() {
        let mut body = RereadableBody::from("{\"a\":1} trailing");

        let mut head = [0u8; 7];
        body.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"{\"a\":1}");

        body.rewind();
        assert_eq!(body.read_all().unwrap(), b"{\"a\":1} trailing");
        assert_eq!(body.read_all().unwrap(), b"{\"a\":1} trailing");
    }

    #[test]
    fn empty_body_reads_nothing() {
        let mut body = RereadableBody::empty();
        assert!(body.read_all().unwrap().is_empty());
        assert!(body.read_all().unwrap().is_empty());
    }
}

//! Response writers.
//!
//! [`ResponseWriter`] is the transport-facing write surface handed to every
//! request event. Optional capabilities (flush, hijack, push, read-from) are
//! resolved by walking [`ResponseWriter::unwrap_writer`] layers until a writer
//! that implements the capability is found.
//!
//! - [`BufferedResponse`] - terminal in-memory writer used by the mux
//! - [`TrackedResponse`] - remembers whether, and with which status, a
//!   response was written

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Errors returned by response writer capabilities.
#[derive(Error, Debug)]
pub enum WriterError {
    /// No layer of the writer chain implements the capability.
    #[error("{0} is not supported by the response writer")]
    NotSupported(&'static str),

    /// A redirect was requested with a non-3xx status.
    #[error("invalid redirect status code {0}")]
    InvalidRedirect(u16),

    /// The underlying write failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A raw, bidirectional connection taken over from the transport.
pub trait Connection: io::Read + io::Write + Send {}

impl<C: io::Read + io::Write + Send> Connection for C {}

/// The write side of an in-flight request.
pub trait ResponseWriter: Send {
    /// Headers staged for the response.
    fn headers(&self) -> &HeaderMap;

    /// Mutable access to the staged headers. Changes after the status line
    /// was written have no effect.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Commit the status line and the staged headers.
    fn write_header(&mut self, status: StatusCode);

    /// Write body bytes, committing a `200 OK` status first if needed.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Write the whole buffer.
    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// The wrapped writer, when this writer is a layer over another one.
    fn unwrap_writer(&mut self) -> Option<&mut dyn ResponseWriter> {
        None
    }

    /// Send any buffered data to the client.
    fn flush(&mut self) -> Result<(), WriterError> {
        match self.unwrap_writer() {
            Some(inner) => inner.flush(),
            None => Err(WriterError::NotSupported("flush")),
        }
    }

    /// Take over the underlying connection.
    fn hijack(&mut self) -> Result<Box<dyn Connection>, WriterError> {
        match self.unwrap_writer() {
            Some(inner) => inner.hijack(),
            None => Err(WriterError::NotSupported("hijack")),
        }
    }

    /// Initiate an HTTP/2 server push of `target`.
    fn push(&mut self, target: &str) -> Result<(), WriterError> {
        match self.unwrap_writer() {
            Some(inner) => inner.push(target),
            None => Err(WriterError::NotSupported("push")),
        }
    }

    /// Copy everything from `src` into the response body.
    ///
    /// Without a specialised layer this falls back to a plain copy loop.
    fn read_from(&mut self, src: &mut dyn io::Read) -> Result<u64, WriterError> {
        if let Some(inner) = self.unwrap_writer() {
            return inner.read_from(src);
        }
        copy_into(self, src)
    }
}

fn copy_into<W: ResponseWriter + ?Sized>(
    dst: &mut W,
    src: &mut dyn io::Read,
) -> Result<u64, WriterError> {
    let mut buf = [0u8; 8 * 1024];
    let mut total = 0u64;
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        dst.write_all(&buf[..n])?;
        total += n as u64;
    }
}

// ============================================================================
// BufferedResponse
// ============================================================================

#[derive(Debug, Default)]
struct Committed {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
}

/// Read side of a [`BufferedResponse`], kept by the mux.
#[derive(Debug, Clone, Default)]
pub struct ResponseSink(Arc<Mutex<Committed>>);

impl ResponseSink {
    /// Build the final response. A response that was never committed is an
    /// empty `200 OK`.
    pub fn into_response(self) -> http::Response<Bytes> {
        let mut committed = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let body = std::mem::take(&mut committed.body).freeze();

        let mut response = http::Response::new(body);
        *response.status_mut() = committed.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = std::mem::take(&mut committed.headers);
        response
    }
}

/// Terminal in-memory writer.
///
/// Headers are staged on the writer itself and copied to the shared
/// [`ResponseSink`] when the status line is committed.
#[derive(Debug)]
pub struct BufferedResponse {
    staged: HeaderMap,
    sink: ResponseSink,
}

impl BufferedResponse {
    /// Create a writer together with the sink that collects its output.
    pub fn new() -> (Self, ResponseSink) {
        let sink = ResponseSink::default();
        let writer = Self {
            staged: HeaderMap::new(),
            sink: sink.clone(),
        };
        (writer, sink)
    }
}

impl ResponseWriter for BufferedResponse {
    fn headers(&self) -> &HeaderMap {
        &self.staged
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.staged
    }

    fn write_header(&mut self, status: StatusCode) {
        let mut committed = self.sink.0.lock().unwrap_or_else(PoisonError::into_inner);
        if committed.status.is_none() {
            committed.status = Some(status);
            committed.headers = self.staged.clone();
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut committed = self.sink.0.lock().unwrap_or_else(PoisonError::into_inner);
        if committed.status.is_none() {
            committed.status = Some(StatusCode::OK);
            committed.headers = self.staged.clone();
        }
        committed.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), WriterError> {
        Ok(())
    }
}

// ============================================================================
// TrackedResponse
// ============================================================================

#[derive(Debug, Default)]
struct StatusInner {
    written: AtomicBool,
    status: AtomicU16,
}

/// Shared view of a [`TrackedResponse`]'s write state.
#[derive(Debug, Clone, Default)]
pub struct WriteStatus(Arc<StatusInner>);

impl WriteStatus {
    /// Whether the status line (and possibly body) was already written.
    pub fn is_written(&self) -> bool {
        self.0.written.load(Ordering::Acquire)
    }

    /// The committed status, if any.
    pub fn status(&self) -> Option<StatusCode> {
        if !self.is_written() {
            return None;
        }
        StatusCode::from_u16(self.0.status.load(Ordering::Acquire)).ok()
    }

    fn mark(&self, status: StatusCode) {
        self.0.status.store(status.as_u16(), Ordering::Release);
        self.0.written.store(true, Ordering::Release);
    }
}

/// A writer layer that records write/status state.
///
/// The error boundary uses it to avoid writing an error envelope over a
/// response a handler already produced.
pub struct TrackedResponse {
    inner: Box<dyn ResponseWriter>,
    state: WriteStatus,
}

impl TrackedResponse {
    /// Wrap `inner`.
    pub fn new(inner: Box<dyn ResponseWriter>) -> Self {
        Self {
            inner,
            state: WriteStatus::default(),
        }
    }

    /// A handle onto the write state that outlives this writer.
    pub fn write_status(&self) -> WriteStatus {
        self.state.clone()
    }

    /// Whether a response was written.
    pub fn is_written(&self) -> bool {
        self.state.is_written()
    }

    /// The committed status, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.state.status()
    }
}

impl ResponseWriter for TrackedResponse {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.state.is_written() {
            tracing::warn!(
                status = status.as_u16(),
                previous = ?self.state.status(),
                "superfluous write_header call ignored"
            );
            return;
        }
        self.state.mark(status);
        self.inner.write_header(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.state.is_written() {
            self.write_header(StatusCode::OK);
        }
        self.inner.write(buf)
    }

    fn unwrap_writer(&mut self) -> Option<&mut dyn ResponseWriter> {
        Some(self.inner.as_mut())
    }

    fn flush(&mut self) -> Result<(), WriterError> {
        self.inner.flush()?;
        if !self.state.is_written() {
            self.state.mark(StatusCode::OK);
        }
        Ok(())
    }

    fn hijack(&mut self) -> Result<Box<dyn Connection>, WriterError> {
        let conn = self.inner.hijack()?;
        if !self.state.is_written() {
            self.state.mark(StatusCode::SWITCHING_PROTOCOLS);
        }
        Ok(conn)
    }

    fn read_from(&mut self, src: &mut dyn io::Read) -> Result<u64, WriterError> {
        if !self.state.is_written() {
            self.write_header(StatusCode::OK);
        }
        self.inner.read_from(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    /// A pass-through layer with no capabilities of its own.
    struct Layer(Box<dyn ResponseWriter>);

    impl ResponseWriter for Layer {
        fn headers(&self) -> &HeaderMap {
            self.0.headers()
        }
        fn headers_mut(&mut self) -> &mut HeaderMap {
            self.0.headers_mut()
        }
        fn write_header(&mut self, status: StatusCode) {
            self.0.write_header(status)
        }
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }
        fn unwrap_writer(&mut self) -> Option<&mut dyn ResponseWriter> {
            Some(self.0.as_mut())
        }
    }

    #[test]
    fn tracked_records_first_status_only() {
        let (buffer, sink) = BufferedResponse::new();
        let mut tracked = TrackedResponse::new(Box::new(buffer));
        let status = tracked.write_status();
        assert!(!status.is_written());

        tracked.write_header(StatusCode::CREATED);
        tracked.write_header(StatusCode::BAD_REQUEST);
        tracked.write(b"ok").unwrap();

        assert_eq!(status.status(), Some(StatusCode::CREATED));
        let response = sink.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.body().as_ref(), b"ok");
    }

    #[test]
    fn write_without_header_implies_ok() {
        let (buffer, sink) = BufferedResponse::new();
        let mut tracked = TrackedResponse::new(Box::new(buffer));
        tracked
            .headers_mut()
            .insert(CONTENT_TYPE, "text/plain".parse().unwrap());
        tracked.write(b"hi").unwrap();
        tracked
            .headers_mut()
            .insert("x-late", "ignored".parse().unwrap());

        assert_eq!(tracked.status(), Some(StatusCode::OK));
        let response = sink.into_response();
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert!(response.headers().get("x-late").is_none());
    }

    #[test]
    fn capabilities_walk_unwrap_layers() {
        let (buffer, sink) = BufferedResponse::new();
        let mut layered = Layer(Box::new(TrackedResponse::new(Box::new(buffer))));

        assert!(layered.flush().is_ok());
        assert!(matches!(
            layered.push("/style.css"),
            Err(WriterError::NotSupported("push"))
        ));
        assert!(matches!(
            layered.hijack(),
            Err(WriterError::NotSupported("hijack"))
        ));

        let mut src: &[u8] = b"streamed body";
        assert_eq!(layered.read_from(&mut src).unwrap(), 13);
        assert_eq!(sink.into_response().body().as_ref(), b"streamed body");
    }

    #[test]
    fn flush_marks_tracked_as_written() {
        let (buffer, _sink) = BufferedResponse::new();
        let mut tracked = TrackedResponse::new(Box::new(buffer));
        tracked.flush().unwrap();
        assert!(tracked.is_written());
    }
}

//! Testing utilities for Hookway.
//!
//! Helpers to verify ordering and reachability of handlers, and to drive a
//! compiled [`Mux`] in memory.
//!
//! # Features
//!
//! - [`Recorder`]: middlewares that log their id into a shared list
//! - [`CountingHandler`]: a pass-through middleware that counts invocations
//! - [`TestRequest`]: a request builder that dispatches straight into a [`Mux`]
//! - [`TestResponse`]: accessors over the buffered response

use crate::router::{HttpEvent, Mux};
use bytes::Bytes;
use hookway_core::{BoxError, BoxFuture, Handler, Resolver};
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

// ============================================================================
// Recorder
// ============================================================================

/// A shared log of handler ids, in the order they ran.
///
/// # Example
///
/// ```rust,ignore
/// let recorder = Recorder::new();
/// router.bind(recorder.middleware("M0"));
/// router.get("/", recorder.action::<RequestEvent>("handler"));
///
/// mux.serve(request).await;
/// assert_eq!(recorder.entries(), ["M0", "handler"]);
/// ```
#[derive(Clone, Default, Debug)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry` to the log.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    /// A middleware with id `id` that records `id` and continues the chain.
    pub fn middleware<T: Resolver>(&self, id: &str) -> Handler<T> {
        let recorder = self.clone();
        let name = id.to_string();
        Handler::new(move |e: &mut T| {
            recorder.record(name.clone());
            e.next()
        })
        .with_id(id)
    }

    /// A terminal action that records `name` and ends the chain.
    pub fn action<T: Resolver>(
        &self,
        name: &str,
    ) -> impl for<'a> Fn(&'a mut T) -> BoxFuture<'a, Result<(), BoxError>> + Send + Sync + 'static
    {
        let recorder = self.clone();
        let name = name.to_string();
        move |_: &mut T| {
            recorder.record(name.clone());
            finished()
        }
    }

    /// A copy of the recorded entries.
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget every entry.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn finished<'a>() -> BoxFuture<'a, Result<(), BoxError>> {
    Box::pin(async { Ok(()) })
}

// ============================================================================
// Counting Handler
// ============================================================================

/// A middleware that counts invocations before continuing the chain.
#[derive(Clone, Default, Debug)]
pub struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl CountingHandler {
    /// Create a new counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current count.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Reset the counter.
    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }

    /// An anonymous handler bound to this counter.
    pub fn handler<T: Resolver>(&self) -> Handler<T> {
        let count = Arc::clone(&self.count);
        Handler::new(move |e: &mut T| {
            count.fetch_add(1, Ordering::SeqCst);
            e.next()
        })
    }
}

// ============================================================================
// In-memory requests
// ============================================================================

/// Builder for a request dispatched straight into a [`Mux`].
#[derive(Debug)]
pub struct TestRequest {
    builder: http::request::Builder,
    body: Bytes,
}

impl TestRequest {
    /// A request with an arbitrary method.
    pub fn new(method: Method, uri: &str) -> Self {
        Self {
            builder: http::Request::builder().method(method).uri(uri),
            body: Bytes::new(),
        }
    }

    /// A `GET` request.
    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    /// A `POST` request.
    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri)
    }

    /// A `HEAD` request.
    pub fn head(uri: &str) -> Self {
        Self::new(Method::HEAD, uri)
    }

    /// Add a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.builder = self.builder.header(name, value);
        self
    }

    /// Set a raw body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a JSON body along with its content type.
    pub fn json<V: serde::Serialize>(self, value: &V) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self.header("content-type", "application/json").body(body))
    }

    /// Set an urlencoded form body along with its content type.
    pub fn form(self, pairs: &[(&str, &str)]) -> Self {
        let encoded = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        self.header("content-type", "application/x-www-form-urlencoded")
            .body(encoded)
    }

    /// Dispatch through `mux`.
    pub async fn send<T: HttpEvent>(self, mux: &Mux<T>) -> Result<TestResponse, http::Error> {
        let request = self.builder.body(self.body)?;
        Ok(TestResponse(mux.serve(request).await))
    }
}

/// A buffered response returned by [`TestRequest::send`].
#[derive(Debug)]
pub struct TestResponse(pub http::Response<Bytes>);

impl TestResponse {
    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.0.status()
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        self.0.headers()
    }

    /// A header value as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.0.headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// The body, lossily decoded as UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.0.body()).into_owned()
    }

    /// The body decoded as JSON.
    pub fn json<V: DeserializeOwned>(&self) -> Result<V, serde_json::Error> {
        serde_json::from_slice(self.0.body())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{RequestEvent, Router};

    #[tokio::test]
    async fn recorder_tracks_order() {
        let recorder = Recorder::new();
        let counter = CountingHandler::new();

        let mut router = Router::new();
        router.bind(recorder.middleware("first"));
        router.bind(counter.handler());
        router.get("/", recorder.action::<RequestEvent>("handler"));
        let mux = router.build_mux().unwrap();

        let response = TestRequest::get("/").send(&mux).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(recorder.entries(), ["first", "handler"]);
        assert_eq!(counter.count(), 1);

        recorder.clear();
        counter.reset();
        assert!(recorder.entries().is_empty());
        assert_eq!(counter.count(), 0);
    }

    #[tokio::test]
    async fn json_and_text_accessors() {
        let mut router = Router::new();
        router.post("/echo", |e: &mut RequestEvent| {
            Box::pin(async move {
                let mut data = serde_json::Map::new();
                e.bind_body(&mut data)?;
                e.json(StatusCode::CREATED, &data)
            })
        });
        let mux = router.build_mux().unwrap();

        let response = TestRequest::post("/echo")
            .json(&serde_json::json!({ "a": 1 }))
            .unwrap()
            .send(&mux)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["a"], 1);
        assert!(response.text().contains("\"a\""));
    }
}

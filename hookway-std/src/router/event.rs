//! The default HTTP event.

use crate::api_error::ApiError;
use crate::binder::{self, BindError, Bindable, FormData};
use crate::router::body::RereadableBody;
use crate::router::mux::{Cleanup, HttpEvent, PathParams, Router};
use crate::router::response::{BufferedResponse, ResponseWriter, WriterError};
use hookway_core::{BoxError, Event, Resolver, Store};
use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue, LOCATION};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Values kept in the per-request scratch store.
pub type StoreValue = Arc<dyn Any + Send + Sync>;

/// The in-flight request, its response writer and a scratch store.
///
/// This is the event type served by `Router<RequestEvent>`; applications
/// with richer needs embed one in their own event type.
pub struct RequestEvent {
    event: Event<RequestEvent>,
    request: http::Request<RereadableBody>,
    response: Box<dyn ResponseWriter>,
    store: Store<String, StoreValue>,
}

impl RequestEvent {
    /// Create an event around a request and its writer.
    pub fn new(request: http::Request<RereadableBody>, response: Box<dyn ResponseWriter>) -> Self {
        Self {
            event: Event::new(),
            request,
            response,
            store: Store::new(),
        }
    }

    /// Event factory for [`Router::with_factory`].
    pub fn factory(
        request: http::Request<RereadableBody>,
        response: Box<dyn ResponseWriter>,
    ) -> (Self, Option<Cleanup>) {
        (Self::new(request, response), None)
    }

    // ---- request -----------------------------------------------------------

    /// The transport request.
    pub fn request(&self) -> &http::Request<RereadableBody> {
        &self.request
    }

    /// Mutable access to the transport request.
    pub fn request_mut(&mut self) -> &mut http::Request<RereadableBody> {
        &mut self.request
    }

    /// A matched path parameter.
    pub fn path_value(&self, name: &str) -> Option<&str> {
        self.request
            .extensions()
            .get::<PathParams>()
            .and_then(|params| params.get(name))
    }

    /// The first value of a query parameter.
    pub fn query_value(&self, name: &str) -> Option<String> {
        self.query()
            .remove(name)
            .and_then(|values| values.into_iter().next())
    }

    /// All query parameters.
    pub fn query(&self) -> FormData {
        self.request
            .uri()
            .query()
            .map(binder::parse_form)
            .unwrap_or_default()
    }

    /// A request header as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    // ---- response ----------------------------------------------------------

    /// The current response writer.
    pub fn response(&mut self) -> &mut dyn ResponseWriter {
        self.response.as_mut()
    }

    /// Replace the response writer with a layer built around it.
    pub fn wrap_response<F>(&mut self, wrap: F)
    where
        F: FnOnce(Box<dyn ResponseWriter>) -> Box<dyn ResponseWriter>,
    {
        let (placeholder, _) = BufferedResponse::new();
        let inner = std::mem::replace(&mut self.response, Box::new(placeholder));
        self.response = wrap(inner);
    }

    // ---- scratch store -----------------------------------------------------

    /// A typed value from the scratch store.
    pub fn get<V: Clone + 'static>(&self, key: &str) -> Option<V> {
        self.store
            .get(&key.to_string())
            .and_then(|value| value.downcast_ref::<V>().cloned())
    }

    /// Store a value for later handlers.
    pub fn set<V: Any + Send + Sync>(&self, key: impl Into<String>, value: V) {
        self.store.set(key.into(), Arc::new(value));
    }

    /// A copy of the whole scratch store.
    pub fn get_all(&self) -> HashMap<String, StoreValue> {
        self.store.get_all()
    }

    /// Replace the whole scratch store.
    pub fn set_all(&self, values: HashMap<String, StoreValue>) {
        self.store.reset(values);
    }

    // ---- response helpers --------------------------------------------------

    fn set_default_content_type(&mut self, content_type: &'static str) {
        let headers = self.response.headers_mut();
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
    }

    fn write_body(&mut self, status: StatusCode, body: &[u8]) -> Result<(), BoxError> {
        self.response.write_header(status);
        if !body.is_empty() {
            self.response.write_all(body)?;
        }
        Ok(())
    }

    /// Write `data` as JSON.
    pub fn json<S: Serialize + ?Sized>(
        &mut self,
        status: StatusCode,
        data: &S,
    ) -> Result<(), BoxError> {
        let body = serde_json::to_vec(data)?;
        self.set_default_content_type("application/json");
        self.write_body(status, &body)
    }

    /// Write a plain text response.
    pub fn string(&mut self, status: StatusCode, text: &str) -> Result<(), BoxError> {
        self.set_default_content_type("text/plain; charset=utf-8");
        self.write_body(status, text.as_bytes())
    }

    /// Write an HTML response.
    pub fn html(&mut self, status: StatusCode, html: &str) -> Result<(), BoxError> {
        self.set_default_content_type("text/html; charset=utf-8");
        self.write_body(status, html.as_bytes())
    }

    /// Write raw bytes with an explicit content type.
    pub fn blob(
        &mut self,
        status: StatusCode,
        content_type: &str,
        data: &[u8],
    ) -> Result<(), BoxError> {
        let value = HeaderValue::from_str(content_type)?;
        self.response.headers_mut().insert(CONTENT_TYPE, value);
        self.write_body(status, data)
    }

    /// Write the status line only.
    pub fn no_content(&mut self, status: StatusCode) -> Result<(), BoxError> {
        self.write_body(status, &[])
    }

    /// Redirect to `url`. Only 3xx statuses are accepted.
    pub fn redirect(&mut self, status: StatusCode, url: &str) -> Result<(), BoxError> {
        if !status.is_redirection() {
            return Err(WriterError::InvalidRedirect(status.as_u16()).into());
        }
        let location = HeaderValue::from_str(url)?;
        self.response.headers_mut().insert(LOCATION, location);
        self.write_body(status, &[])
    }

    /// Commit the status line.
    pub fn write_status(&mut self, status: StatusCode) {
        self.response.write_header(status);
    }

    /// Set a response header.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response.headers_mut().insert(name, value);
    }

    /// Flush the response writer.
    pub fn flush(&mut self) -> Result<(), WriterError> {
        self.response.flush()
    }

    // ---- errors ------------------------------------------------------------

    /// A custom [`ApiError`].
    pub fn error(
        &self,
        status: StatusCode,
        message: impl Into<String>,
        raw: Option<BoxError>,
    ) -> ApiError {
        ApiError::new(status, message, raw)
    }

    /// 404 [`ApiError`].
    pub fn not_found_error(&self, message: impl Into<String>, raw: Option<BoxError>) -> ApiError {
        ApiError::not_found(message, raw)
    }

    /// 400 [`ApiError`].
    pub fn bad_request_error(&self, message: impl Into<String>, raw: Option<BoxError>) -> ApiError {
        ApiError::bad_request(message, raw)
    }

    /// 403 [`ApiError`].
    pub fn forbidden_error(&self, message: impl Into<String>, raw: Option<BoxError>) -> ApiError {
        ApiError::forbidden(message, raw)
    }

    /// 401 [`ApiError`].
    pub fn unauthorized_error(
        &self,
        message: impl Into<String>,
        raw: Option<BoxError>,
    ) -> ApiError {
        ApiError::unauthorized(message, raw)
    }

    /// 429 [`ApiError`].
    pub fn too_many_requests_error(
        &self,
        message: impl Into<String>,
        raw: Option<BoxError>,
    ) -> ApiError {
        ApiError::too_many_requests(message, raw)
    }

    /// 500 [`ApiError`].
    pub fn internal_server_error(
        &self,
        message: impl Into<String>,
        raw: Option<BoxError>,
    ) -> ApiError {
        ApiError::internal(message, raw)
    }

    // ---- binding -----------------------------------------------------------

    /// Bind the request body into `dst`.
    ///
    /// JSON bodies are merged over `dst` with plain JSON semantics;
    /// urlencoded forms go through [`binder::unmarshal_request_data`]. The
    /// body is rewound afterwards.
    pub fn bind_body<D: Bindable + ?Sized>(&mut self, dst: &mut D) -> Result<(), BindError> {
        let content_type = self.header(CONTENT_TYPE.as_str()).unwrap_or_default().to_string();

        let body = self.request.body_mut().read_all()?;
        self.request.body_mut().rewind();
        if body.is_empty() {
            return Ok(());
        }

        if content_type.starts_with("application/json") {
            dst.merge_json_payload(&body)
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let text = String::from_utf8_lossy(&body);
            binder::unmarshal_request_data(&binder::parse_form(&text), dst, "", "")
        } else {
            Err(BindError::UnsupportedContentType(content_type))
        }
    }
}

impl Resolver for RequestEvent {
    fn continuation(&mut self) -> &mut Event<Self> {
        &mut self.event
    }
}

impl HttpEvent for RequestEvent {
    fn response_writer(&mut self) -> &mut dyn ResponseWriter {
        self.response.as_mut()
    }
}

impl fmt::Debug for RequestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestEvent")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("continuation", &self.event)
            .finish_non_exhaustive()
    }
}

impl Router<RequestEvent> {
    /// A router serving [`RequestEvent`]s.
    pub fn new() -> Self {
        Self::with_factory(RequestEvent::factory)
    }
}

impl Default for Router<RequestEvent> {
    fn default() -> Self {
        Self::new()
    }
}

//! # Router and Mux
//!
//! [`Router`] owns the root [`RouterGroup`] and the event factory. Calling
//! [`Router::build_mux`] validates the tree, composes one chain per route and
//! freezes everything into a [`Mux`], an immutable dispatch table that can be
//! shared between request workers.
//!
//! Every request goes through a composed chain, including requests that match
//! no route: those run through the root `/` route registered for every
//! method, or through an implicit not-found route composed from the root
//! middlewares when the application didn't register one.

use crate::api_error::{ApiError, to_api_error};
use crate::router::body::RereadableBody;
use crate::router::group::{ComposedRoute, Route, RouterGroup, route_key};
use crate::router::response::{BufferedResponse, ResponseWriter, TrackedResponse, WriteStatus};
use bytes::Bytes;
use hookway_core::{BoxError, HandlerFunc, Resolver, handler_fn};
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Method, StatusCode};
use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use thiserror::Error;

/// Name of the hidden catch-all parameter backing `/`-terminated patterns.
const SUBTREE_PARAM: &str = "__subtree";

/// Errors detected while building a [`Mux`].
#[derive(Error, Debug)]
pub enum RouterError {
    /// Two routes share the same method and (normalized) path.
    #[error("duplicate route {0:?}")]
    Duplicate(String),

    /// The full route path doesn't start with `/`.
    #[error("route path {0:?} must start with '/'")]
    MissingLeadingSlash(String),

    /// The route method is not a valid HTTP method token.
    #[error("invalid route method {0:?}")]
    InvalidMethod(String),

    /// The pattern was rejected by the path matcher.
    #[error("invalid route pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Matcher error.
        #[source]
        source: matchit::InsertError,
    },
}

/// Callback run after a request chain completes, whatever its outcome.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Builds the application event from the transport request and writer.
pub type EventFactory<T> = Arc<
    dyn Fn(http::Request<RereadableBody>, Box<dyn ResponseWriter>) -> (T, Option<Cleanup>)
        + Send
        + Sync,
>;

/// Events the mux can dispatch.
#[diagnostic::on_unimplemented(
    message = "`{Self}` cannot be served by a `Mux`",
    label = "missing `HttpEvent` implementation",
    note = "Expose the response writer handed to the event factory through \
            `HttpEvent::response_writer`."
)]
pub trait HttpEvent: Resolver {
    /// The writer the error boundary writes failures to.
    fn response_writer(&mut self) -> &mut dyn ResponseWriter;
}

/// Matched path parameters, stored in the request extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    /// Value of the named parameter.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Iterate `(name, value)` pairs in pattern order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether no parameter matched.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ============================================================================
// Router
// ============================================================================

/// The routing tree plus the event factory used to serve it.
///
/// Dereferences to its root [`RouterGroup`], so routes and middlewares can be
/// registered on the router directly.
pub struct Router<T> {
    root: RouterGroup<T>,
    factory: EventFactory<T>,
}

impl<T: HttpEvent> Router<T> {
    /// Create a router producing events with `factory`.
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn(http::Request<RereadableBody>, Box<dyn ResponseWriter>) -> (T, Option<Cleanup>)
            + Send
            + Sync
            + 'static,
    {
        Self {
            root: RouterGroup::new(""),
            factory: Arc::new(factory),
        }
    }

    /// Validate the routing tree and freeze it into a [`Mux`].
    pub fn build_mux(&self) -> Result<Mux<T>, RouterError> {
        let mut mux = Mux {
            tables: HashMap::new(),
            any: matchit::Router::new(),
            routes: Vec::new(),
            fallback: 0,
            factory: Arc::clone(&self.factory),
        };

        let mut seen = HashSet::new();
        let mut fallback = None;
        for composed in self.root.compose() {
            let key = route_key(&composed.method, &composed.pattern);
            if !seen.insert(key.clone()) {
                return Err(RouterError::Duplicate(key));
            }
            if composed.method.is_empty() && composed.pattern == "/" {
                fallback = Some(mux.routes.len());
            }
            mux.insert(composed)?;
        }

        mux.fallback = match fallback {
            Some(index) => index,
            None => {
                let not_found: HandlerFunc<T> = handler_fn(|_: &mut T| {
                    Box::pin(async { Err::<(), BoxError>(ApiError::not_found("", None).into()) })
                });
                let route = Route::detached("", "/", not_found);
                mux.routes
                    .push(CompiledRoute::from(self.root.compose_detached(&route)));
                mux.routes.len() - 1
            }
        };

        Ok(mux)
    }
}

impl<T> Deref for Router<T> {
    type Target = RouterGroup<T>;

    fn deref(&self) -> &Self::Target {
        &self.root
    }
}

impl<T> DerefMut for Router<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.root
    }
}

// ============================================================================
// Mux
// ============================================================================

struct CompiledRoute<T> {
    composed: ComposedRoute<T>,
    catch_all: bool,
}

impl<T> From<ComposedRoute<T>> for CompiledRoute<T> {
    fn from(composed: ComposedRoute<T>) -> Self {
        Self {
            catch_all: composed.pattern.ends_with('/') || composed.pattern.contains("{*"),
            composed,
        }
    }
}

/// Immutable dispatch table built by [`Router::build_mux`].
pub struct Mux<T> {
    tables: HashMap<String, matchit::Router<usize>>,
    any: matchit::Router<usize>,
    routes: Vec<CompiledRoute<T>>,
    fallback: usize,
    factory: EventFactory<T>,
}

impl<T: HttpEvent> Mux<T> {
    fn insert(&mut self, composed: ComposedRoute<T>) -> Result<(), RouterError> {
        let pattern = composed.pattern.clone();
        if !pattern.starts_with('/') {
            return Err(RouterError::MissingLeadingSlash(pattern));
        }
        if !composed.method.is_empty() && Method::from_bytes(composed.method.as_bytes()).is_err() {
            return Err(RouterError::InvalidMethod(composed.method));
        }

        let index = self.routes.len();
        let table = if composed.method.is_empty() {
            &mut self.any
        } else {
            self.tables.entry(composed.method.clone()).or_default()
        };

        let invalid = |source| RouterError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        };
        table.insert(pattern.as_str(), index).map_err(invalid)?;
        if pattern.ends_with('/') {
            table
                .insert(format!("{pattern}{{*{SUBTREE_PARAM}}}"), index)
                .map_err(invalid)?;
        }

        tracing::debug!(
            method = %composed.method,
            pattern = %pattern,
            chain = composed.hook.length(),
            "route compiled"
        );
        self.routes.push(CompiledRoute::from(composed));
        Ok(())
    }

    /// Number of dispatchable routes, the fallback included.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the mux holds no route at all.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// `METHOD pattern` of every route, in registration order.
    pub fn patterns(&self) -> Vec<String> {
        self.routes
            .iter()
            .map(|r| {
                let ComposedRoute {
                    method, pattern, ..
                } = &r.composed;
                if method.is_empty() {
                    pattern.clone()
                } else {
                    format!("{method} {pattern}")
                }
            })
            .collect()
    }

    fn lookup(table: &matchit::Router<usize>, path: &str) -> Option<(usize, PathParams)> {
        let matched = table.at(path).ok()?;
        let params = matched
            .params
            .iter()
            .filter(|(name, _)| *name != SUBTREE_PARAM)
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Some((*matched.value, PathParams(params)))
    }

    /// Pick the route for `method` and `path`.
    ///
    /// Method-specific routes win over method-less ones unless only the
    /// method-specific match is a catch-all.
    fn resolve(&self, method: &Method, path: &str) -> Option<(usize, PathParams)> {
        let by_method = self
            .tables
            .get(method.as_str())
            .and_then(|table| Self::lookup(table, path))
            .or_else(|| {
                if *method == Method::HEAD {
                    self.tables
                        .get(Method::GET.as_str())
                        .and_then(|table| Self::lookup(table, path))
                } else {
                    None
                }
            });
        let any = Self::lookup(&self.any, path);

        match (by_method, any) {
            (Some(specific), Some(generic)) => {
                if self.routes[specific.0].catch_all && !self.routes[generic.0].catch_all {
                    Some(generic)
                } else {
                    Some(specific)
                }
            }
            (specific, generic) => specific.or(generic),
        }
    }

    /// Dispatch a request through its composed chain.
    pub async fn serve<B>(&self, request: http::Request<B>) -> http::Response<Bytes>
    where
        B: Into<RereadableBody>,
    {
        let (mut parts, body) = request.into_parts();
        let method = parts.method.clone();

        let (index, params) = match self.resolve(&method, parts.uri.path()) {
            Some(found) => found,
            None => {
                tracing::debug!(
                    method = %method,
                    path = %parts.uri.path(),
                    "no route matched, using fallback"
                );
                (self.fallback, PathParams::default())
            }
        };
        parts.extensions.insert(params);

        let (buffer, sink) = BufferedResponse::new();
        let tracked = TrackedResponse::new(Box::new(buffer));
        let status = tracked.write_status();

        let request = http::Request::from_parts(parts, body.into());
        let (mut event, cleanup) = (self.factory)(request, Box::new(tracked));

        if let Some(route) = self.routes.get(index) {
            let composed = &route.composed;
            let result = composed
                .hook
                .trigger_with(&mut event, vec![Arc::clone(&composed.action)])
                .await;
            if let Err(err) = result {
                error_handler(event.response_writer(), &status, &method, err);
            }
        }

        if !status.is_written() {
            event.response_writer().write_header(StatusCode::OK);
        }
        drop(event);
        if let Some(cleanup) = cleanup {
            cleanup();
        }

        let mut response = sink.into_response();
        if method == Method::HEAD {
            *response.body_mut() = Bytes::new();
        }
        response
    }
}

/// Write `err` as a JSON [`ApiError`] envelope, unless a response was already
/// written. `HEAD` requests get the status and headers only.
pub fn error_handler(
    writer: &mut dyn ResponseWriter,
    status: &WriteStatus,
    method: &Method,
    err: BoxError,
) {
    if status.is_written() {
        tracing::debug!(error = %err, "response already written, dropping handler error");
        return;
    }

    let api_err = to_api_error(err);
    if api_err.status >= 500 {
        tracing::error!(status = api_err.status, error = ?api_err.raw(), "request failed");
    } else {
        tracing::debug!(status = api_err.status, error = ?api_err.raw(), "request failed");
    }

    if !writer.headers().contains_key(CONTENT_TYPE) {
        writer
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    writer.write_header(api_err.status_code());

    if *method == Method::HEAD {
        return;
    }
    match serde_json::to_vec(&api_err) {
        Ok(body) => {
            if let Err(e) = writer.write_all(&body) {
                tracing::error!(error = %e, "failed to write error response");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to serialize error response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookway_core::{BoxFuture, Event};

    struct Bare {
        event: Event<Bare>,
        writer: Box<dyn ResponseWriter>,
    }

    impl Resolver for Bare {
        fn continuation(&mut self) -> &mut Event<Self> {
            &mut self.event
        }
    }

    impl HttpEvent for Bare {
        fn response_writer(&mut self) -> &mut dyn ResponseWriter {
            self.writer.as_mut()
        }
    }

    fn router() -> Router<Bare> {
        Router::with_factory(|_req, writer| {
            (
                Bare {
                    event: Event::new(),
                    writer,
                },
                None,
            )
        })
    }

    fn ok(e: &mut Bare) -> BoxFuture<'_, Result<(), BoxError>> {
        Box::pin(async move {
            e.writer.write_all(b"ok")?;
            Ok(())
        })
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut r = router();
        r.get("/a/{*rest}", ok);
        r.group("/a").get("/", ok);
        assert!(matches!(r.build_mux(), Err(RouterError::Duplicate(_))));

        let mut r = router();
        r.get("/x", ok);
        r.post("/x", ok);
        r.any("/x", ok);
        assert!(r.build_mux().is_ok());
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        let mut r = router();
        r.get("x", ok);
        assert!(matches!(
            r.build_mux(),
            Err(RouterError::MissingLeadingSlash(_))
        ));

        let mut r = router();
        r.route("BAD METHOD", "/x", ok);
        assert!(matches!(r.build_mux(), Err(RouterError::InvalidMethod(_))));

        let mut r = router();
        r.get("/{a}", ok);
        r.get("/{b}", ok);
        assert!(matches!(
            r.build_mux(),
            Err(RouterError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn implicit_fallback_is_added_once() {
        let r = router();
        let mux = r.build_mux().unwrap();
        assert_eq!(mux.len(), 1);

        let mut r = router();
        r.any("/", ok);
        let mux = r.build_mux().unwrap();
        assert_eq!(mux.len(), 1);
        assert_eq!(mux.patterns(), vec!["/"]);
    }

    #[test]
    fn resolve_prefers_specific_routes() {
        let mut r = router();
        r.get("/users/{id}", ok);
        r.any("/users/me", ok);
        r.get("/static/", ok);
        r.any("/", ok);
        let mux = r.build_mux().unwrap();

        let (index, params) = mux.resolve(&Method::GET, "/users/42").unwrap();
        assert_eq!(mux.routes[index].composed.pattern, "/users/{id}");
        assert_eq!(params.get("id"), Some("42"));

        let (index, _) = mux.resolve(&Method::GET, "/users/me").unwrap();
        assert_eq!(mux.routes[index].composed.pattern, "/users/{id}");

        let (index, params) = mux.resolve(&Method::HEAD, "/static/css/app.css").unwrap();
        assert_eq!(mux.routes[index].composed.pattern, "/static/");
        assert!(params.is_empty());

        let (index, _) = mux.resolve(&Method::POST, "/nothing/here").unwrap();
        assert_eq!(mux.routes[index].composed.pattern, "/");
    }
}

//! # Router Groups
//!
//! A [`RouterGroup`] is a prefix scope in the routing tree. It owns its
//! middlewares, an exclusion set and its children (nested groups and
//! [`Route`]s), kept in registration order.
//!
//! Middleware removal never touches ancestors: [`RouterGroup::unbind`] and
//! [`Route::unbind`] strip matching handlers from the scope and its
//! descendants and record the id in the scope's exclusion set. The set is
//! consulted when the per-route chain is composed, so an inherited middleware
//! with that id is skipped for everything at or below the scope.

use hookway_core::{BoxError, BoxFuture, Handler, HandlerFunc, Hook, Resolver, handler_fn};
use std::collections::HashSet;

/// A leaf of the routing tree.
pub struct Route<T> {
    /// Upper-cased HTTP method. Empty matches every method.
    pub method: String,
    /// Path relative to the owning group.
    pub path: String,
    pub(crate) action: HandlerFunc<T>,
    middlewares: Vec<Handler<T>>,
    excluded: HashSet<String>,
}

impl<T: Resolver> Route<T> {
    fn new(method: &str, path: &str, action: HandlerFunc<T>) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            action,
            middlewares: Vec::new(),
            excluded: HashSet::new(),
        }
    }

    /// Append a route middleware. A named middleware is also removed from the
    /// route's exclusion set.
    pub fn bind(&mut self, handler: Handler<T>) -> &mut Self {
        if !handler.id.is_empty() {
            self.excluded.remove(&handler.id);
        }
        self.middlewares.push(handler);
        self
    }

    /// Append an anonymous route middleware.
    pub fn bind_func<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut T) -> BoxFuture<'a, Result<(), BoxError>> + Send + Sync + 'static,
    {
        self.bind(Handler::new(f))
    }

    /// Remove the listed middlewares from the route and exclude any
    /// inherited middleware with the same ids.
    pub fn unbind<I, S>(&mut self, ids: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in ids {
            self.unbind_one(id.as_ref());
        }
        self
    }

    fn unbind_one(&mut self, id: &str) {
        if id.is_empty() {
            return;
        }
        self.middlewares.retain(|h| h.id != id);
        self.excluded.insert(id.to_string());
    }

    /// The route's own middlewares.
    pub fn middlewares(&self) -> &[Handler<T>] {
        &self.middlewares
    }

    /// Whether `id` is excluded at this route.
    pub fn is_excluded(&self, id: &str) -> bool {
        self.excluded.contains(id)
    }
}

#[derive(Clone, Copy)]
enum Child {
    Group(usize),
    Route(usize),
}

/// A prefix scope of the routing tree.
pub struct RouterGroup<T> {
    /// Path prefix prepended to every descendant route.
    pub prefix: String,
    middlewares: Vec<Handler<T>>,
    excluded: HashSet<String>,
    groups: Vec<RouterGroup<T>>,
    routes: Vec<Route<T>>,
    children: Vec<Child>,
}

/// A route with its chain resolved from every enclosing scope.
pub(crate) struct ComposedRoute<T> {
    pub method: String,
    pub pattern: String,
    pub hook: Hook<T>,
    pub action: HandlerFunc<T>,
}

macro_rules! verb_shorthands {
    ($($(#[$doc:meta])* $name:ident => $method:literal;)*) => {
        $(
            $(#[$doc])*
            pub fn $name<F>(&mut self, path: &str, action: F) -> &mut Route<T>
            where
                F: for<'a> Fn(&'a mut T) -> BoxFuture<'a, Result<(), BoxError>>
                    + Send
                    + Sync
                    + 'static,
            {
                self.route($method, path, action)
            }
        )*
    };
}

impl<T: Resolver> RouterGroup<T> {
    /// Create a detached group.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            middlewares: Vec::new(),
            excluded: HashSet::new(),
            groups: Vec::new(),
            routes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Register and return a nested group.
    pub fn group(&mut self, prefix: impl Into<String>) -> &mut RouterGroup<T> {
        let index = self.groups.len();
        self.groups.push(RouterGroup::new(prefix));
        self.children.push(Child::Group(index));
        &mut self.groups[index]
    }

    /// Register and return a route. An empty `method` matches every method.
    pub fn route<F>(&mut self, method: &str, path: &str, action: F) -> &mut Route<T>
    where
        F: for<'a> Fn(&'a mut T) -> BoxFuture<'a, Result<(), BoxError>> + Send + Sync + 'static,
    {
        self.route_func(method, path, handler_fn(action))
    }

    pub(crate) fn route_func(
        &mut self,
        method: &str,
        path: &str,
        action: HandlerFunc<T>,
    ) -> &mut Route<T> {
        let index = self.routes.len();
        self.routes.push(Route::new(method, path, action));
        self.children.push(Child::Route(index));
        &mut self.routes[index]
    }

    verb_shorthands! {
        /// Route matching every method.
        any => "";
        /// `GET` route.
        get => "GET";
        /// `SEARCH` route.
        search => "SEARCH";
        /// `POST` route.
        post => "POST";
        /// `DELETE` route.
        delete => "DELETE";
        /// `PATCH` route.
        patch => "PATCH";
        /// `PUT` route.
        put => "PUT";
        /// `HEAD` route.
        head => "HEAD";
        /// `OPTIONS` route.
        options => "OPTIONS";
    }

    /// Append a group middleware. A named middleware is also removed from the
    /// group's exclusion set.
    pub fn bind(&mut self, handler: Handler<T>) -> &mut Self {
        if !handler.id.is_empty() {
            self.excluded.remove(&handler.id);
        }
        self.middlewares.push(handler);
        self
    }

    /// Append an anonymous group middleware.
    pub fn bind_func<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut T) -> BoxFuture<'a, Result<(), BoxError>> + Send + Sync + 'static,
    {
        self.bind(Handler::new(f))
    }

    /// Remove the listed middlewares from this group and all its descendants,
    /// and exclude inherited middlewares with the same ids.
    pub fn unbind<I, S>(&mut self, ids: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in ids {
            self.unbind_one(id.as_ref());
        }
        self
    }

    fn unbind_one(&mut self, id: &str) {
        if id.is_empty() {
            return;
        }
        self.middlewares.retain(|h| h.id != id);
        for group in &mut self.groups {
            group.unbind_one(id);
        }
        for route in &mut self.routes {
            route.unbind_one(id);
        }
        self.excluded.insert(id.to_string());
    }

    /// The group's own middlewares.
    pub fn middlewares(&self) -> &[Handler<T>] {
        &self.middlewares
    }

    /// Whether `id` is excluded at this group.
    pub fn is_excluded(&self, id: &str) -> bool {
        self.excluded.contains(id)
    }

    /// Whether a route with the same method and full path is registered.
    ///
    /// A path ending in `/` is considered equal to the same path followed by
    /// a catch-all segment, e.g. `/files/` and `/files/{*path}`.
    pub fn has_route(&self, method: &str, path: &str) -> bool {
        let wanted = route_key(method, path);
        let mut found = false;
        self.walk(&mut Vec::new(), &mut |parents, group, route| {
            if !found && route_key(&route.method, &full_path(parents, group, route)) == wanted {
                found = true;
            }
        });
        found
    }

    /// Compose the chain of every route below this group.
    pub(crate) fn compose(&self) -> Vec<ComposedRoute<T>> {
        let mut composed = Vec::new();
        self.walk(&mut Vec::new(), &mut |parents, group, route| {
            composed.push(compose_route(parents, group, route));
        });
        composed
    }

    /// Compose a route as if it were registered directly on this group.
    pub(crate) fn compose_detached(&self, route: &Route<T>) -> ComposedRoute<T> {
        compose_route(&[], self, route)
    }

    fn walk<'s, V>(&'s self, parents: &mut Vec<&'s RouterGroup<T>>, visit: &mut V)
    where
        V: FnMut(&[&'s RouterGroup<T>], &'s RouterGroup<T>, &'s Route<T>),
    {
        for child in &self.children {
            match *child {
                Child::Group(index) => {
                    parents.push(self);
                    self.groups[index].walk(parents, visit);
                    parents.pop();
                }
                Child::Route(index) => visit(parents.as_slice(), self, &self.routes[index]),
            }
        }
    }
}

impl<T: Resolver> Route<T> {
    pub(crate) fn detached(method: &str, path: &str, action: HandlerFunc<T>) -> Self {
        Self::new(method, path, action)
    }
}

fn compose_route<T: Resolver>(
    parents: &[&RouterGroup<T>],
    group: &RouterGroup<T>,
    route: &Route<T>,
) -> ComposedRoute<T> {
    let hook = Hook::new();

    for parent in parents {
        for h in &parent.middlewares {
            if !parent.excluded.contains(&h.id)
                && !group.excluded.contains(&h.id)
                && !route.excluded.contains(&h.id)
            {
                hook.bind(h.clone());
            }
        }
    }

    for h in &group.middlewares {
        if !group.excluded.contains(&h.id) && !route.excluded.contains(&h.id) {
            hook.bind(h.clone());
        }
    }

    for h in &route.middlewares {
        if !route.excluded.contains(&h.id) {
            hook.bind(h.clone());
        }
    }

    ComposedRoute {
        method: route.method.clone(),
        pattern: full_path(parents, group, route),
        hook,
        action: route.action.clone(),
    }
}

fn full_path<T>(parents: &[&RouterGroup<T>], group: &RouterGroup<T>, route: &Route<T>) -> String {
    let mut path: String = parents.iter().map(|p| p.prefix.as_str()).collect();
    path.push_str(&group.prefix);
    path.push_str(&route.path);
    path
}

/// `METHOD path` with a trailing catch-all segment reduced to `/`.
pub(crate) fn route_key(method: &str, path: &str) -> String {
    let path = strip_wildcard(path);
    if method.is_empty() {
        path.to_string()
    } else {
        format!("{} {path}", method.to_ascii_uppercase())
    }
}

/// Reduce a trailing `/{*name}` segment to `/`.
pub(crate) fn strip_wildcard(path: &str) -> &str {
    match path.rfind("/{*") {
        Some(index) if path.ends_with('}') && !path[index + 1..].contains('/') => {
            &path[..=index]
        }
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookway_core::Event;

    #[derive(Default)]
    struct Probe {
        event: Event<Probe>,
        seen: Vec<String>,
    }

    impl Resolver for Probe {
        fn continuation(&mut self) -> &mut Event<Self> {
            &mut self.event
        }
    }

    fn mw(id: &'static str) -> Handler<Probe> {
        Handler::new(move |e: &mut Probe| {
            Box::pin(async move {
                e.seen.push(id.to_string());
                e.next().await
            })
        })
        .with_id(id)
    }

    fn noop(e: &mut Probe) -> BoxFuture<'_, Result<(), BoxError>> {
        Box::pin(async move {
            e.seen.push("action".into());
            Ok(())
        })
    }

    fn ids(route: &ComposedRoute<Probe>) -> Vec<String> {
        route.hook.handlers().into_iter().map(|h| h.id).collect()
    }

    #[test]
    fn strip_wildcard_only_touches_trailing_catch_all() {
        assert_eq!(strip_wildcard("/files/{*path}"), "/files/");
        assert_eq!(strip_wildcard("/files/"), "/files/");
        assert_eq!(strip_wildcard("/{*path}"), "/");
        assert_eq!(strip_wildcard("/a/{id}"), "/a/{id}");
        assert_eq!(strip_wildcard("/a/{*x}/b"), "/a/{*x}/b");
    }

    #[test]
    fn has_route_checks_full_paths() {
        let mut root: RouterGroup<Probe> = RouterGroup::new("");
        root.group("/api").group("/v1").get("/users/{id}", noop);
        root.group("/files").any("/{*path}", noop);

        assert!(root.has_route("GET", "/api/v1/users/{id}"));
        assert!(root.has_route("get", "/api/v1/users/{id}"));
        assert!(!root.has_route("POST", "/api/v1/users/{id}"));
        assert!(!root.has_route("", "/api/v1/users/{id}"));
        assert!(root.has_route("", "/files/"));
        assert!(root.has_route("", "/files/{*rest}"));
        assert!(!root.has_route("", "/"));
    }

    #[test]
    fn composition_orders_ancestor_group_route() {
        let mut root: RouterGroup<Probe> = RouterGroup::new("");
        root.bind(mw("m0"));
        let group = root.group("/a/b");
        group.bind(mw("m1"));
        group.get("/1", noop).bind(mw("m2"));

        let composed = root.compose();
        assert_eq!(composed.len(), 1);
        assert_eq!(composed[0].pattern, "/a/b/1");
        assert_eq!(composed[0].method, "GET");
        assert_eq!(ids(&composed[0]), vec!["m0", "m1", "m2"]);
    }

    #[test]
    fn route_unbind_excludes_inherited_middleware() {
        let mut root: RouterGroup<Probe> = RouterGroup::new("");
        root.bind(mw("m0"));
        let group = root.group("/a/b");
        group.bind(mw("m1"));
        group.get("/1", noop).bind(mw("m2")).unbind(["m1"]);
        group.get("/2", noop);

        let composed = root.compose();
        assert_eq!(ids(&composed[0]), vec!["m0", "m2"]);
        assert_eq!(ids(&composed[1]), vec!["m0", "m1"]);
    }

    #[test]
    fn group_unbind_recurses_and_rebind_restores() {
        let mut root: RouterGroup<Probe> = RouterGroup::new("");
        root.bind(mw("auth"));
        let api = root.group("/api");
        api.get("/private", noop).bind(mw("auth"));
        let public = api.group("/public");
        public.get("/x", noop);

        api.unbind(["auth"]);
        assert!(api.is_excluded("auth"));

        let composed = root.compose();
        assert!(ids(&composed[0]).is_empty());
        assert!(ids(&composed[1]).is_empty());

        // re-binding at the excluding scope lifts the exclusion
        let mut root: RouterGroup<Probe> = RouterGroup::new("");
        root.bind(mw("auth"));
        let api = root.group("/api");
        api.unbind(["auth"]);
        api.get("/x", noop).bind(mw("auth"));
        api.get("/y", noop);
        api.bind(mw("auth"));
        assert!(!api.is_excluded("auth"));

        let composed = root.compose();
        // the ancestor copy is back too, and the group copy replaces it in place
        assert_eq!(ids(&composed[0]), vec!["auth"]);
        assert_eq!(ids(&composed[1]), vec!["auth"]);
    }

    #[test]
    fn same_id_at_route_replaces_inherited_in_place() {
        let mut root: RouterGroup<Probe> = RouterGroup::new("");
        root.bind(mw("a"));
        root.bind(mw("b"));
        root.get("/", noop).bind(mw("a").with_priority(0));

        let composed = root.compose();
        assert_eq!(ids(&composed[0]), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn composed_chain_runs_action_last() {
        let mut root: RouterGroup<Probe> = RouterGroup::new("");
        root.bind(mw("late").with_priority(100));
        root.get("/", noop).bind(mw("early").with_priority(-100));

        let composed = root.compose();
        let mut probe = Probe::default();
        composed[0]
            .hook
            .trigger_with(&mut probe, vec![composed[0].action.clone()])
            .await
            .unwrap();
        assert_eq!(probe.seen, vec!["early", "late", "action"]);
    }
}

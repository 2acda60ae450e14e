//! # Tagged Hook
//!
//! A filtering view over a shared [`Hook`]. Handlers registered through the
//! view are stored on the base hook, wrapped in a guard that only lets them run
//! when the event carries one of the view's tags. Events that don't match skip
//! straight to the next handler.
//!
//! Because the wrapped handlers live on the base hook, several views over the
//! same hook interleave by priority exactly as if they were one chain.

use crate::error::BoxError;
use crate::event::Resolver;
use crate::hook::{Handler, Hook, handler_fn};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::Arc;

/// Events that declare tags for [`TaggedHook`] filtering.
pub trait Tagger {
    /// The tags of this event, e.g. a collection id and name.
    fn tags(&self) -> Vec<String>;
}

/// A tag-filtered view over a shared [`Hook`].
pub struct TaggedHook<'a, T> {
    base: &'a Hook<T>,
    tags: Arc<HashSet<String>>,
}

impl<'a, T> TaggedHook<'a, T>
where
    T: Resolver + Tagger,
{
    /// Create a view over `base`. An empty tag list matches every event.
    pub fn new<I, S>(base: &'a Hook<T>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            base,
            tags: Arc::new(tags.into_iter().map(Into::into).collect()),
        }
    }

    /// The tags of this view.
    pub fn tags(&self) -> Vec<String> {
        self.tags.iter().cloned().collect()
    }

    /// Whether an event with `event_tags` should reach this view's handlers.
    pub fn can_trigger_on(&self, event_tags: &[String]) -> bool {
        can_trigger_on(&self.tags, event_tags)
    }

    /// Register a handler on the base hook, guarded by this view's tags.
    pub fn bind(&self, handler: Handler<T>) -> String {
        let tags = Arc::clone(&self.tags);
        let func = handler.func;
        let guarded = handler_fn(move |e: &mut T| {
            if can_trigger_on(&tags, &e.tags()) {
                func(e)
            } else {
                e.next()
            }
        });

        self.base.bind(Handler {
            id: handler.id,
            func: guarded,
            priority: handler.priority,
        })
    }

    /// Register an anonymous guarded handler with priority 0.
    pub fn bind_func<F>(&self, f: F) -> String
    where
        F: for<'b> Fn(&'b mut T) -> BoxFuture<'b, Result<(), BoxError>> + Send + Sync + 'static,
    {
        self.bind(Handler::new(f))
    }

    /// Remove named handlers from the base hook.
    pub fn unbind<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.base.unbind(ids);
    }

    /// Number of handlers on the base hook.
    pub fn length(&self) -> usize {
        self.base.length()
    }

    /// Trigger the base hook.
    pub async fn trigger(&self, event: &mut T) -> Result<(), BoxError> {
        self.base.trigger(event).await
    }
}

fn can_trigger_on(tags: &HashSet<String>, event_tags: &[String]) -> bool {
    tags.is_empty() || event_tags.iter().any(|t| tags.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    #[derive(Default)]
    struct Tagged {
        event: Event<Tagged>,
        tags: Vec<String>,
        fired: Vec<&'static str>,
    }

    impl Resolver for Tagged {
        fn continuation(&mut self) -> &mut Event<Self> {
            &mut self.event
        }
    }

    impl Tagger for Tagged {
        fn tags(&self) -> Vec<String> {
            self.tags.clone()
        }
    }

    fn mark(name: &'static str) -> Handler<Tagged> {
        Handler::new(move |e: &mut Tagged| {
            Box::pin(async move {
                e.fired.push(name);
                e.next().await
            })
        })
    }

    #[tokio::test]
    async fn views_filter_by_tag_intersection() {
        let base = Hook::new();
        TaggedHook::new(&base, Vec::<String>::new()).bind(mark("all"));
        TaggedHook::new(&base, ["b1", "b2"]).bind(mark("b"));
        TaggedHook::new(&base, ["c1", "c2"]).bind(mark("c"));
        TaggedHook::new(&base, ["missing"]).bind(mark("missing"));

        let mut event = Tagged {
            tags: vec!["b1".into(), "c2".into()],
            ..Default::default()
        };
        base.trigger(&mut event).await.unwrap();
        assert_eq!(event.fired, vec!["all", "b", "c"]);
    }

    #[tokio::test]
    async fn views_interleave_with_base_handlers_by_priority() {
        let base = Hook::new();
        base.bind(mark("base-late").with_priority(10));
        TaggedHook::new(&base, ["x"]).bind(mark("x-early").with_priority(-10));
        TaggedHook::new(&base, ["y"]).bind(mark("y-mid"));

        let mut event = Tagged {
            tags: vec!["x".into()],
            ..Default::default()
        };
        base.trigger(&mut event).await.unwrap();
        assert_eq!(event.fired, vec!["x-early", "base-late"]);
        assert_eq!(base.length(), 3);
    }

    #[test]
    fn can_trigger_on_checks() {
        let base: Hook<Tagged> = Hook::new();
        let open = TaggedHook::new(&base, Vec::<String>::new());
        assert!(open.can_trigger_on(&[]));

        let scoped = TaggedHook::new(&base, ["a"]);
        assert!(scoped.can_trigger_on(&["z".into(), "a".into()]));
        assert!(!scoped.can_trigger_on(&["z".into()]));
        assert!(!scoped.can_trigger_on(&[]));
    }
}

//! Topic router: demultiplexes inbound envelopes by topic
//!
//! One broadcast channel carries every topic; the router fans each
//! envelope out to the listeners registered for its topic. Listener sets
//! are independent per topic and keyed by a caller-chosen name, so
//! registering the same key twice replaces the earlier registration
//! instead of duplicating delivery, and unregistering removes exactly one.
//!
//! Uses BTreeMap for deterministic dispatch order.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::messages::{Envelope, Topic};

/// A registered topic listener.
///
/// Listeners run synchronously on the dispatching thread and must return
/// control immediately; all protocol handlers in this crate do.
pub type Listener = Box<dyn FnMut(&Envelope) + Send>;

/// Per-topic keyed listener registry.
pub struct TopicRouter {
    listeners: BTreeMap<Topic, BTreeMap<String, Listener>>,
    envelopes_dispatched: u64,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self {
            listeners: BTreeMap::new(),
            envelopes_dispatched: 0,
        }
    }

    /// Register a listener under `key` for `topic`.
    ///
    /// Returns true when an earlier registration under the same key was
    /// replaced.
    pub fn register(&mut self, topic: Topic, key: impl Into<String>, listener: Listener) -> bool {
        let key = key.into();
        let replaced = self
            .listeners
            .entry(topic)
            .or_default()
            .insert(key.clone(), listener)
            .is_some();

        debug!(topic = %topic, key = %key, replaced, "Listener registered");
        replaced
    }

    /// Remove the registration under `key` for `topic`.
    ///
    /// Returns true when a registration was removed.
    pub fn unregister(&mut self, topic: Topic, key: &str) -> bool {
        let removed = self
            .listeners
            .get_mut(&topic)
            .map(|set| set.remove(key).is_some())
            .unwrap_or(false);

        if removed {
            debug!(topic = %topic, key, "Listener unregistered");
        }
        removed
    }

    /// Drop every registration on every topic.
    pub fn clear(&mut self) {
        let count = self.total_listeners();
        self.listeners.clear();
        if count > 0 {
            debug!(listeners = count, "Router cleared");
        }
    }

    /// Deliver an envelope to every listener on its topic.
    ///
    /// Returns the number of listeners invoked. An envelope for a topic
    /// with no listeners is not an error.
    pub fn dispatch(&mut self, envelope: &Envelope) -> usize {
        self.envelopes_dispatched += 1;

        let Some(set) = self.listeners.get_mut(&envelope.topic) else {
            trace!(topic = %envelope.topic, "No listeners for topic");
            return 0;
        };

        let mut invoked = 0;
        for listener in set.values_mut() {
            listener(envelope);
            invoked += 1;
        }

        trace!(topic = %envelope.topic, invoked, "Envelope dispatched");
        invoked
    }

    /// Number of listeners registered for a topic.
    pub fn listener_count(&self, topic: Topic) -> usize {
        self.listeners.get(&topic).map(BTreeMap::len).unwrap_or(0)
    }

    /// Whether any listener is registered for a topic.
    pub fn has_listeners(&self, topic: Topic) -> bool {
        self.listener_count(topic) > 0
    }

    /// Total registrations across all topics.
    pub fn total_listeners(&self) -> usize {
        self.listeners.values().map(BTreeMap::len).sum()
    }

    /// Total envelopes pushed through dispatch since creation.
    pub fn envelopes_dispatched(&self) -> u64 {
        self.envelopes_dispatched
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WindowId;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn envelope(topic: Topic) -> Envelope {
        Envelope {
            topic,
            sender: WindowId::new(),
            payload: Value::Null,
        }
    }

    fn counting_listener(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = Arc::clone(counter);
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_dispatch_reaches_topic_listeners() {
        let mut router = TopicRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        router.register(Topic::News, "feed", counting_listener(&hits));

        let invoked = router.dispatch(&envelope(Topic::News));
        assert_eq!(invoked, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_topics_do_not_interfere() {
        let mut router = TopicRouter::new();
        let news_hits = Arc::new(AtomicUsize::new(0));
        let watchlist_hits = Arc::new(AtomicUsize::new(0));
        router.register(Topic::News, "feed", counting_listener(&news_hits));
        router.register(Topic::Watchlist, "groups", counting_listener(&watchlist_hits));

        router.dispatch(&envelope(Topic::News));
        router.dispatch(&envelope(Topic::News));

        assert_eq!(news_hits.load(Ordering::SeqCst), 2);
        assert_eq!(watchlist_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_same_key_replaces_instead_of_duplicating() {
        let mut router = TopicRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));

        assert!(!router.register(Topic::News, "feed", counting_listener(&hits)));
        assert!(router.register(Topic::News, "feed", counting_listener(&hits)));
        assert_eq!(router.listener_count(Topic::News), 1);

        router.dispatch(&envelope(Topic::News));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_multiple_independent_subscribers() {
        let mut router = TopicRouter::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        router.register(Topic::Details, "chart", counting_listener(&a));
        router.register(Topic::Details, "header", counting_listener(&b));

        let invoked = router.dispatch(&envelope(Topic::Details));
        assert_eq!(invoked, 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_removes_exactly_one() {
        let mut router = TopicRouter::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        router.register(Topic::News, "feed", counting_listener(&a));
        router.register(Topic::News, "ticker", counting_listener(&b));

        assert!(router.unregister(Topic::News, "feed"));
        assert!(!router.unregister(Topic::News, "feed"));

        router.dispatch(&envelope(Topic::News));
        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_without_listeners_is_noop() {
        let mut router = TopicRouter::new();
        assert_eq!(router.dispatch(&envelope(Topic::Onion)), 0);
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut router = TopicRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        router.register(Topic::News, "feed", counting_listener(&hits));
        router.register(Topic::Onion, "compass", counting_listener(&hits));
        assert_eq!(router.total_listeners(), 2);

        router.clear();
        assert_eq!(router.total_listeners(), 0);
        router.dispatch(&envelope(Topic::News));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}

//! Event bus - topic-based publish/subscribe
//!
//! Dashboard widgets coordinate through a small set of process-wide
//! notifications: configuration reloads, "stop refreshing" when the server
//! goes offline, "server available" when it comes back, path changes, and
//! the "server probably disconnected" fan-out emitted on transport failures.
//!
//! The bus is an injected value, not a global. Publishing only queues the
//! message; the owner drains the queue (`take_pending`) and delivers each
//! message to the subscribers registered for its topic. Deferred delivery
//! keeps a publish from re-entering a subscriber that is still running.
//!
//! # Example
//!
//! ```rust
//! use vigil_core::bus::{EventBus, Topic};
//! use serde_json::json;
//!
//! let mut bus = EventBus::<u32>::new();
//! bus.subscribe(Topic::ConfigChanged, 7);
//! bus.publish(Topic::ConfigChanged, json!({ "source": "settings" }));
//!
//! let message = bus.take_pending().unwrap();
//! assert_eq!(bus.subscribers(&message.topic), &[7]);
//! ```

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;

/// Number of recently published messages kept for inspection
const RECENT_CAPACITY: usize = 128;

/// Notification topics
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Configuration (user, role or page) changed
    ConfigChanged,
    /// Server went offline, widgets should stop refreshing
    StopRefreshing,
    /// Server is reachable again
    ServerAvailable,
    /// The data path a widget is bound to changed
    PathChanged,
    /// A request failed at the transport level
    ServerProbablyDisconnected,
    /// Application-defined topic
    Custom(String),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::ConfigChanged => f.write_str("config_changed"),
            Topic::StopRefreshing => f.write_str("stop_refreshing"),
            Topic::ServerAvailable => f.write_str("server_available"),
            Topic::PathChanged => f.write_str("path_changed"),
            Topic::ServerProbablyDisconnected => f.write_str("server_probably_disconnected"),
            Topic::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// A published notification
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: Topic,
    #[serde(default)]
    pub payload: Value,
}

impl Message {
    pub fn new(topic: Topic, payload: Value) -> Self {
        Self { topic, payload }
    }
}

/// Topic-based publish/subscribe with deferred delivery
///
/// `S` identifies a subscriber (typically a component handle).
pub struct EventBus<S> {
    subscribers: FxHashMap<Topic, SmallVec<[S; 4]>>,
    pending: VecDeque<Message>,
    recent: VecDeque<Message>,
    published: FxHashMap<Topic, usize>,
}

impl<S: Copy + Eq> EventBus<S> {
    pub fn new() -> Self {
        Self {
            subscribers: FxHashMap::default(),
            pending: VecDeque::new(),
            recent: VecDeque::with_capacity(RECENT_CAPACITY),
            published: FxHashMap::default(),
        }
    }

    /// Subscribe to a topic
    ///
    /// Subscribing twice to the same topic is a no-op. Returns `true` if the
    /// subscription is new.
    pub fn subscribe(&mut self, topic: Topic, subscriber: S) -> bool {
        let subs = self.subscribers.entry(topic).or_default();
        if subs.contains(&subscriber) {
            return false;
        }
        subs.push(subscriber);
        true
    }

    /// Remove a subscription, returning whether it existed
    pub fn unsubscribe(&mut self, topic: &Topic, subscriber: S) -> bool {
        let Some(subs) = self.subscribers.get_mut(topic) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| *s != subscriber);
        before != subs.len()
    }

    /// Remove every subscription held by `subscriber`
    pub fn unsubscribe_all(&mut self, subscriber: S) {
        for subs in self.subscribers.values_mut() {
            subs.retain(|s| *s != subscriber);
        }
    }

    /// Check whether `subscriber` listens to `topic`
    pub fn is_subscribed(&self, topic: &Topic, subscriber: S) -> bool {
        self.subscribers
            .get(topic)
            .is_some_and(|subs| subs.contains(&subscriber))
    }

    /// Subscribers of a topic, in subscription order
    pub fn subscribers(&self, topic: &Topic) -> &[S] {
        self.subscribers
            .get(topic)
            .map(|subs| subs.as_slice())
            .unwrap_or(&[])
    }

    /// Queue a message for delivery
    pub fn publish(&mut self, topic: Topic, payload: Value) {
        tracing::trace!(%topic, "publish");
        *self.published.entry(topic.clone()).or_insert(0) += 1;

        let message = Message::new(topic, payload);
        if self.recent.len() == RECENT_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(message.clone());
        self.pending.push_back(message);
    }

    /// Take the next undelivered message
    pub fn take_pending(&mut self) -> Option<Message> {
        self.pending.pop_front()
    }

    /// Number of undelivered messages
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Total number of messages ever published on a topic
    pub fn published_count(&self, topic: &Topic) -> usize {
        self.published.get(topic).copied().unwrap_or(0)
    }

    /// Most recently published messages, oldest first
    pub fn recent(&self) -> impl Iterator<Item = &Message> {
        self.recent.iter()
    }

    /// Drop all subscriptions and queued messages
    pub fn clear(&mut self) {
        self.subscribers.clear();
        self.pending.clear();
        self.recent.clear();
        self.published.clear();
    }
}

impl<S: Copy + Eq> Default for EventBus<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut bus = EventBus::<u32>::new();

        assert!(bus.subscribe(Topic::PathChanged, 1));
        assert!(!bus.subscribe(Topic::PathChanged, 1));
        assert!(bus.subscribe(Topic::PathChanged, 2));

        assert_eq!(bus.subscribers(&Topic::PathChanged), &[1, 2]);
        assert!(bus.subscribers(&Topic::ConfigChanged).is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let mut bus = EventBus::<u32>::new();
        bus.subscribe(Topic::ConfigChanged, 1);
        bus.subscribe(Topic::StopRefreshing, 1);
        bus.subscribe(Topic::StopRefreshing, 2);

        assert!(bus.unsubscribe(&Topic::ConfigChanged, 1));
        assert!(!bus.unsubscribe(&Topic::ConfigChanged, 1));

        bus.unsubscribe_all(1);
        assert!(!bus.is_subscribed(&Topic::StopRefreshing, 1));
        assert!(bus.is_subscribed(&Topic::StopRefreshing, 2));
    }

    #[test]
    fn test_publish_is_deferred() {
        let mut bus = EventBus::<u32>::new();
        bus.publish(Topic::ServerProbablyDisconnected, json!({ "status": 0 }));
        bus.publish(Topic::Custom("alarm".into()), Value::Null);

        assert_eq!(bus.pending_len(), 2);
        let first = bus.take_pending().unwrap();
        assert_eq!(first.topic, Topic::ServerProbablyDisconnected);
        assert_eq!(first.payload, json!({ "status": 0 }));
        assert_eq!(
            bus.take_pending().map(|m| m.topic),
            Some(Topic::Custom("alarm".into()))
        );
        assert!(bus.take_pending().is_none());

        assert_eq!(bus.published_count(&Topic::ServerProbablyDisconnected), 1);
        assert_eq!(bus.recent().count(), 2);
    }

    #[test]
    fn test_recent_is_bounded() {
        let mut bus = EventBus::<u32>::new();
        for i in 0..(RECENT_CAPACITY + 10) {
            bus.publish(Topic::ConfigChanged, json!(i));
        }

        assert_eq!(bus.recent().count(), RECENT_CAPACITY);
        assert_eq!(bus.recent().next().map(|m| &m.payload), Some(&json!(10)));
        assert_eq!(
            bus.published_count(&Topic::ConfigChanged),
            RECENT_CAPACITY + 10
        );
    }

    #[test]
    fn test_topic_display() {
        assert_eq!(Topic::StopRefreshing.to_string(), "stop_refreshing");
        assert_eq!(Topic::Custom("x".into()).to_string(), "custom:x");
    }
}

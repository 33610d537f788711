//! Headless, named-topic publish/subscribe message bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! Topics are plain strings such as `"/camera/depth/points"` or
//! `"/hpp/target/position"`.  The channel backing a topic is created lazily
//! the first time anybody publishes to it or subscribes to it, and lives as
//! long as the bus.
//!
//! Receivers can be polled asynchronously ([`TopicReceiver::recv`]) or
//! without blocking ([`TopicReceiver::try_recv`]); the latter is what the
//! blocking acquisition loop of the capture service relies on.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use agimus_types::{AgimusError, Event, EventPayload};
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Shared message bus. Clone it cheaply – all clones share the same
/// underlying broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    capacity: usize,
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Event>>>>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.  Tokio
    /// broadcast channels reject a zero capacity, so `0` is bumped to `1`.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish `payload` on `topic`.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`AgimusError::Channel`] when nobody is subscribed to the topic.
    pub fn publish(&self, topic: &str, payload: EventPayload) -> Result<usize, AgimusError> {
        self.publish_event(Event::new(topic, payload))
    }

    /// Publish an already-built [`Event`] on the topic it names.
    pub fn publish_event(&self, event: Event) -> Result<usize, AgimusError> {
        let topic = event.topic.clone();
        match self.sender(&topic).send(event) {
            Ok(n) => {
                trace!(topic = %topic, receivers = n, "event published");
                Ok(n)
            }
            Err(broadcast::error::SendError(_)) => Err(AgimusError::Channel(format!(
                "No subscribers for topic {topic}"
            ))),
        }
    }

    /// Subscribe to `topic`.
    ///
    /// Only events published after this call are delivered.
    pub fn subscribe(&self, topic: &str) -> TopicReceiver {
        TopicReceiver {
            topic: topic.to_string(),
            receiver: self.sender(topic).subscribe(),
        }
    }

    /// Number of receivers currently subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels.get(topic).map_or(0, |s| s.receiver_count())
    }

    /// Names of all topics that have been used so far, sorted.
    pub fn topics(&self) -> Vec<String> {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        let mut topics: Vec<String> = channels.keys().cloned().collect();
        topics.sort();
        topics
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Event> {
        {
            let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
            if let Some(sender) = channels.get(topic) {
                return sender.clone();
            }
        }
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic receiver
// ---------------------------------------------------------------------------

/// A receiver bound to a single topic.
///
/// Obtained via [`EventBus::subscribe`].
#[derive(Debug)]
pub struct TopicReceiver {
    topic: String,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Take the next pending event without waiting.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The topic this receiver is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

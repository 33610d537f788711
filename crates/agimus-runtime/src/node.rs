//! Acquisition node: the services' handle on the message bus.
//!
//! A [`NodeHandle`] plays the role of a ROS node handle.  Subscriptions are
//! polled explicitly with [`Subscriber::spin_once`], which lets a blocking
//! service interleave message processing with its own wait loop.

use std::collections::VecDeque;
use std::sync::Arc;

use agimus_middleware::{EventBus, TopicReceiver};
use agimus_types::{AgimusError, EventPayload, PointCloud2};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, warn};

/// Handle through which a service talks to the bus.
#[derive(Clone)]
pub struct NodeHandle {
    bus: Arc<EventBus>,
    name: String,
}

impl NodeHandle {
    /// Create a handle named `name`.
    ///
    /// Names are made absolute; anonymous nodes get a unique suffix so that
    /// several instances can coexist.
    pub fn new(bus: Arc<EventBus>, name: &str, anonymous: bool) -> Self {
        let mut resolved = if name.starts_with('/') {
            name.to_string()
        } else {
            format!("/{name}")
        };
        if anonymous {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            resolved.push('_');
            resolved.push_str(&suffix[..12]);
        }
        debug!(node = %resolved, "node handle created");
        Self {
            bus,
            name: resolved,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to `topic`, keeping at most `queue_size` pending messages
    /// per spin (0 is treated as 1).
    pub fn subscribe(&self, topic: &str, queue_size: usize) -> Subscriber {
        Subscriber {
            receiver: self.bus.subscribe(topic),
            queue_size: queue_size.max(1),
        }
    }

    pub fn advertise(&self, topic: &str) -> Publisher {
        Publisher {
            bus: Arc::clone(&self.bus),
            topic: topic.to_string(),
        }
    }
}

/// Point-cloud subscription.  Dropping it unsubscribes.
pub struct Subscriber {
    receiver: TopicReceiver,
    queue_size: usize,
}

impl Subscriber {
    pub fn topic(&self) -> &str {
        self.receiver.topic()
    }

    /// Drain the pending messages and hand the newest `queue_size` point
    /// clouds to `callback`, oldest first.
    ///
    /// Returns the number of messages delivered.  The first callback error
    /// stops delivery and is returned.
    pub fn spin_once<F>(&mut self, mut callback: F) -> Result<usize, AgimusError>
    where
        F: FnMut(&PointCloud2) -> Result<(), AgimusError>,
    {
        let mut pending = VecDeque::with_capacity(self.queue_size);
        loop {
            match self.receiver.try_recv() {
                Ok(event) => match event.payload {
                    EventPayload::PointCloud(cloud) => {
                        if pending.len() == self.queue_size {
                            pending.pop_front();
                        }
                        pending.push_back(cloud);
                    }
                    _ => debug!(topic = %self.topic(), "ignoring non point-cloud message"),
                },
                Err(TryRecvError::Lagged(n)) => {
                    warn!(topic = %self.topic(), lagged_by = n, "subscriber lagged; oldest messages dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        let delivered = pending.len();
        for cloud in &pending {
            callback(cloud)?;
        }
        Ok(delivered)
    }
}

/// Publisher bound to one topic.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<EventBus>,
    topic: String,
}

impl Publisher {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish `payload`.  Returns the number of receivers; publishing with
    /// no listener is not an error.
    pub fn publish(&self, payload: EventPayload) -> Result<usize, AgimusError> {
        match self.bus.publish(&self.topic, payload) {
            Ok(n) => Ok(n),
            Err(AgimusError::Channel(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

//! Live change notifications for subscribed listeners.
//!
//! Each subscriber owns a bounded channel. Publishing iterates a snapshot of
//! the registry and drops any subscriber whose channel is full or closed, so
//! a slow listener never blocks ingest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::debug;

/// Method name for index membership changes.
pub const LIST_CHANGED: &str = "notifications/resources/list-changed";

/// Method name for content changes of one stream.
pub const RESOURCE_UPDATED: &str = "notifications/resources/updated";

/// A JSON-RPC notification frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    jsonrpc: &'static str,
    method: &'static str,
    params: Value,
}

impl Notification {
    /// The set of streams changed.
    #[must_use]
    pub fn list_changed() -> Self {
        Self {
            jsonrpc: "2.0",
            method: LIST_CHANGED,
            params: json!({}),
        }
    }

    /// A stream received new records.
    #[must_use]
    pub fn updated(uri: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: RESOURCE_UPDATED,
            params: json!({ "uri": uri.into() }),
        }
    }

    /// The notification method.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        self.method
    }

    /// The notification parameters.
    #[must_use]
    pub const fn params(&self) -> &Value {
        &self.params
    }
}

/// Registry of live notification subscribers.
#[derive(Debug)]
pub struct Broadcaster {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Notification>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Broadcaster {
    /// Creates a broadcaster whose subscribers buffer up to `capacity` notifications.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Registers a subscriber. Dropping the returned handle unregisters it.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().insert(id, tx);
        debug!(subscriber = id, "Notification subscriber registered");
        Subscription {
            id,
            receiver: rx,
            registry: Arc::downgrade(self),
        }
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Delivers `notification` to every subscriber.
    ///
    /// Returns the number of subscribers that accepted it. Subscribers whose
    /// channel is full or closed are removed.
    pub fn publish(&self, notification: &Notification) -> usize {
        let snapshot: Vec<(u64, mpsc::Sender<Notification>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, tx) in snapshot {
            if tx.try_send(notification.clone()).is_ok() {
                delivered += 1;
            } else {
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for id in &failed {
                subscribers.remove(id);
            }
            debug!(dropped = failed.len(), "Removed unresponsive subscribers");
        }

        delivered
    }

    /// Publishes a list-changed notification.
    pub fn notify_list_changed(&self) -> usize {
        self.publish(&Notification::list_changed())
    }

    /// Publishes an updated notification for `uri`.
    pub fn notify_updated(&self, uri: &str) -> usize {
        self.publish(&Notification::updated(uri))
    }

    fn unregister(&self, id: u64) {
        if self.subscribers.lock().remove(&id).is_some() {
            debug!(subscriber = id, "Notification subscriber unregistered");
        }
    }
}

/// A registered subscriber's receiving end.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<Notification>,
    registry: Weak<Broadcaster>,
}

impl Subscription {
    /// Subscriber id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next notification. `None` once the subscriber was dropped
    /// from the registry and its queue drained.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }
}

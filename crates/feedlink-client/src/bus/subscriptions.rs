//! Subscription table: topic -> listener registrations.
//!
//! The only concurrently-mutated shared structure in the client. Guarded by
//! an async `RwLock` so a registration racing a mid-delivery message for the
//! same topic is neither lost nor duplicated. Fan-out is synchronous on the
//! single consumer task, which preserves per-topic delivery order.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::warn;

use super::EventEnvelope;

/// Per-listener channel capacity. A listener that falls this far behind has
/// its oldest-pending messages dropped, not the whole delivery loop.
const LISTENER_CAPACITY: usize = 64;

/// Thread-safe registry of topic subscriptions and their listeners.
#[derive(Clone)]
pub struct SubscriptionTable {
    inner: Arc<RwLock<HashMap<String, HashMap<String, mpsc::Sender<EventEnvelope>>>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a listener on a topic and return its event receiver.
    ///
    /// Idempotent per `(topic, listener)`: re-registering the same listener
    /// replaces its previous channel rather than adding a second delivery.
    /// The returned flag is `true` when this is the first listener for the
    /// topic, i.e. the caller should issue a network-level subscribe.
    pub async fn register(
        &self,
        topic: &str,
        listener: &str,
    ) -> (mpsc::Receiver<EventEnvelope>, bool) {
        let (tx, rx) = mpsc::channel(LISTENER_CAPACITY);
        let mut table = self.inner.write().await;
        let first_for_topic = !table.contains_key(topic);
        table
            .entry(topic.to_owned())
            .or_default()
            .insert(listener.to_owned(), tx);
        (rx, first_for_topic)
    }

    /// Remove every listener for a topic. Returns `true` when the topic had
    /// an active registration (caller should issue a network unsubscribe).
    pub async fn remove_topic(&self, topic: &str) -> bool {
        self.inner.write().await.remove(topic).is_some()
    }

    /// Deliver one event to every listener of its topic, in registration
    /// table order, without awaiting any receiver. Listeners whose receiver
    /// has been dropped are pruned; a lagging listener loses this message
    /// with a diagnostic instead of stalling the others.
    pub async fn deliver(&self, topic: &str, envelope: &EventEnvelope) {
        let mut table = self.inner.write().await;
        let Some(listeners) = table.get_mut(topic) else {
            return;
        };

        listeners.retain(|listener, tx| match tx.try_send(envelope.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(topic, listener, "Listener lagging, event dropped");
                true
            }
        });
    }

    /// Snapshot of every topic with at least one listener. This is exactly
    /// the set replayed to the bus after a reconnect.
    pub async fn topics(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }

    /// Number of listeners currently registered on a topic.
    pub async fn listener_count(&self, topic: &str) -> usize {
        self.inner
            .read()
            .await
            .get(topic)
            .map_or(0, HashMap::len)
    }
}

impl Default for SubscriptionTable {
    fn default() -> Self {
        Self::new()
    }
}

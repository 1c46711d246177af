//! Topic subscription registry.
//!
//! Keeps at most one underlying subscription per topic on the current link,
//! however many consumers ask for it, and fans every message out to all
//! registered listeners of that topic in registration order.
//!
//! The registry lock is never held while a listener runs. Listeners may
//! subscribe, cancel, or even disconnect from inside a callback.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use sitelink_proto::{validate_topic, SubscriptionId};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::channel::transport::Link;
use crate::channel::ConnectionEvent;
use crate::error::{ListenerError, SyncError, SyncResult};

/// Callback invoked with every parsed payload on a topic.
pub type Listener = Arc<dyn Fn(&Value) -> Result<(), ListenerError> + Send + Sync>;

/// Build a [`Listener`] from a closure.
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&Value) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Outcome of delivering one inbound message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Listeners that handled the payload.
    pub delivered: usize,
    /// Listeners that returned an error or panicked.
    pub failed: usize,
}

struct Consumer {
    id: u64,
    listener: Listener,
}

struct TopicEntry {
    subscription: SubscriptionId,
    consumers: Vec<Consumer>,
}

#[derive(Default)]
struct RegistryInner {
    link: Option<Arc<dyn Link>>,
    /// Bumped on every invalidation; handles from an older epoch are inert.
    epoch: u64,
    next_subscription: u64,
    next_consumer: u64,
    topics: HashMap<String, TopicEntry>,
    routes: HashMap<SubscriptionId, String>,
}

/// Registry of topic subscriptions on the current push channel link.
pub struct SubscriptionRegistry {
    inner: Mutex<RegistryInner>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl SubscriptionRegistry {
    /// Create a detached registry reporting failures on `events`.
    #[must_use]
    pub fn new(events: broadcast::Sender<ConnectionEvent>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RegistryInner::default()),
            events,
        })
    }

    /// Register `listener` for `topic`.
    ///
    /// The first consumer of a topic opens the underlying subscription on the
    /// link; later consumers share it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] when no link is attached,
    /// [`SyncError::InvalidTopic`] for a malformed topic, or the link's error
    /// if the underlying subscribe could not be sent.
    pub fn subscribe(
        self: &Arc<Self>,
        topic: &str,
        listener: Listener,
    ) -> SyncResult<SubscriptionHandle> {
        validate_topic(topic)?;

        let mut inner = self.inner.lock();
        let link = inner.link.clone().ok_or(SyncError::NotConnected)?;

        inner.next_consumer += 1;
        let consumer_id = inner.next_consumer;
        let consumer = Consumer {
            id: consumer_id,
            listener,
        };

        if let Some(entry) = inner.topics.get_mut(topic) {
            entry.consumers.push(consumer);
            debug!(topic, consumers = entry.consumers.len(), "joined existing subscription");
        } else {
            inner.next_subscription += 1;
            let subscription = SubscriptionId::from_sequence(inner.next_subscription);
            link.subscribe(&subscription, topic)?;
            debug!(topic, %subscription, "opened underlying subscription");

            inner.routes.insert(subscription.clone(), topic.to_string());
            inner.topics.insert(
                topic.to_string(),
                TopicEntry {
                    subscription,
                    consumers: vec![consumer],
                },
            );
        }

        Ok(SubscriptionHandle {
            registry: Arc::downgrade(self),
            topic: topic.to_string(),
            consumer_id,
            epoch: inner.epoch,
            cancelled: AtomicBool::new(false),
        })
    }

    /// Number of topics with an underlying subscription.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.inner.lock().topics.len()
    }

    /// Number of consumers registered for `topic`.
    #[must_use]
    pub fn consumer_count(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .topics
            .get(topic)
            .map_or(0, |entry| entry.consumers.len())
    }

    /// Whether a live link is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.lock().link.is_some()
    }

    /// Install the live link. Subscribes are accepted from now on.
    pub(crate) fn attach(&self, link: Arc<dyn Link>) {
        self.inner.lock().link = Some(link);
    }

    /// Drop every entry and detach from the link in one step.
    ///
    /// No unsubscribe is sent: the link is going away. Outstanding handles
    /// become inert. Returns the number of topics that were dropped.
    pub(crate) fn invalidate(&self) -> usize {
        let (topics, link) = {
            let mut inner = self.inner.lock();
            inner.epoch += 1;
            inner.routes.clear();
            (std::mem::take(&mut inner.topics), inner.link.take())
        };
        let dropped = topics.len();
        if dropped > 0 || link.is_some() {
            debug!(topics = dropped, "subscription registry invalidated");
        }
        dropped
    }

    fn current_epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    fn cancel(&self, topic: &str, consumer_id: u64, epoch: u64) {
        let (removed, closing) = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                return;
            }
            let Some(entry) = inner.topics.get_mut(topic) else {
                return;
            };
            let Some(pos) = entry.consumers.iter().position(|c| c.id == consumer_id) else {
                return;
            };
            let removed = entry.consumers.remove(pos);

            if entry.consumers.is_empty() {
                let subscription = entry.subscription.clone();
                inner.topics.remove(topic);
                inner.routes.remove(&subscription);
                (removed, inner.link.clone().map(|link| (link, subscription)))
            } else {
                (removed, None)
            }
        };
        drop(removed);

        if let Some((link, subscription)) = closing {
            debug!(topic, %subscription, "closing underlying subscription");
            if let Err(e) = link.unsubscribe(&subscription) {
                warn!(topic, %subscription, error = %e, "failed to send unsubscribe");
            }
        }
    }

    fn is_registered(&self, epoch: u64, topic: &str, consumer_id: u64) -> bool {
        let inner = self.inner.lock();
        inner.epoch == epoch
            && inner
                .topics
                .get(topic)
                .is_some_and(|entry| entry.consumers.iter().any(|c| c.id == consumer_id))
    }

    /// Deliver an inbound message to every listener of its subscription.
    ///
    /// The payload is parsed once; a malformed payload is dropped and
    /// reported. Each listener is isolated: an error or panic is reported and
    /// delivery moves on to the next listener. A listener cancelled by an
    /// earlier listener of the same message is skipped.
    pub(crate) fn dispatch(&self, subscription: &SubscriptionId, body: &str) -> Delivery {
        let (epoch, topic, listeners) = {
            let inner = self.inner.lock();
            let Some(topic) = inner.routes.get(subscription) else {
                debug!(%subscription, "message for unknown subscription dropped");
                return Delivery::default();
            };
            let Some(entry) = inner.topics.get(topic.as_str()) else {
                return Delivery::default();
            };
            let listeners: Vec<(u64, Listener)> = entry
                .consumers
                .iter()
                .map(|c| (c.id, Arc::clone(&c.listener)))
                .collect();
            (inner.epoch, topic.clone(), listeners)
        };

        let payload: Value = match serde_json::from_str(body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic = %topic, error = %e, "dropping malformed payload");
                let _ = self.events.send(ConnectionEvent::MalformedPayload {
                    topic,
                    error: e.to_string(),
                });
                return Delivery::default();
            }
        };

        let mut delivery = Delivery::default();
        for (consumer_id, listener) in listeners {
            if !self.is_registered(epoch, &topic, consumer_id) {
                continue;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(&payload)));
            let error = match outcome {
                Ok(Ok(())) => {
                    delivery.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            delivery.failed += 1;
            warn!(topic = %topic, consumer_id, %error, "listener failed");
            let _ = self.events.send(ConnectionEvent::ListenerFailed {
                topic: topic.clone(),
                error,
            });
        }
        delivery
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("listener panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("listener panicked: {msg}")
    } else {
        "listener panicked".to_string()
    }
}

/// Handle to one consumer registration.
///
/// Its only operation is [`cancel`](Self::cancel), which dropping the handle
/// performs as well. Cancelling after the connection was torn down is a
/// no-op.
#[must_use = "dropping a subscription handle cancels the subscription"]
pub struct SubscriptionHandle {
    registry: Weak<SubscriptionRegistry>,
    topic: String,
    consumer_id: u64,
    epoch: u64,
    cancelled: AtomicBool,
}

impl SubscriptionHandle {
    /// Topic this handle is registered for.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether the registration is still live on the current connection.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
            && self
                .registry
                .upgrade()
                .is_some_and(|registry| registry.current_epoch() == self.epoch)
    }

    /// Remove this consumer. The underlying subscription closes when the
    /// last consumer of the topic cancels. Idempotent.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.cancel(&self.topic, self.consumer_id, self.epoch);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("consumer_id", &self.consumer_id)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

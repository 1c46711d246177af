//! Connection manager.
//!
//! Owns the single push channel link of a session. `connect` is idempotent
//! for the same credential; a different credential tears the old link down
//! before a new one is opened. Failures are retried after a fixed delay until
//! `disconnect` or a superseding `connect`.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::credential::Credential;
use crate::error::SyncResult;
use crate::registry::{Listener, SubscriptionHandle, SubscriptionRegistry};

use super::events::ConnectionEvent;
use super::state::{AtomicConnectionState, ConnectionState};
use super::transport::{Connector, Inbound, Link};

/// Mutable connection slot. Only touched under the manager lock.
#[derive(Default)]
struct Slot {
    /// Bumped whenever the current attempt or link is superseded.
    generation: u64,
    credential: Option<Credential>,
    link: Option<Arc<dyn Link>>,
    task: Option<JoinHandle<()>>,
}

struct ManagerInner {
    connector: Arc<dyn Connector>,
    config: SyncConfig,
    registry: Arc<SubscriptionRegistry>,
    events: broadcast::Sender<ConnectionEvent>,
    state: AtomicConnectionState,
    slot: Mutex<Slot>,
}

/// Manages the lifecycle of the push channel connection.
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Create a disconnected manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(connector: Arc<dyn Connector>, config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        let registry = SubscriptionRegistry::new(events.clone());
        Ok(Self {
            inner: Arc::new(ManagerInner {
                connector,
                config,
                registry,
                events,
                state: AtomicConnectionState::new(ConnectionState::Disconnected),
                slot: Mutex::new(Slot::default()),
            }),
        })
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.load()
    }

    /// Credential of the current (or pending) connection.
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        self.inner.slot.lock().credential.clone()
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// The subscription registry bound to this connection.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    /// Observe connection events (the error observer).
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Register a listener for `topic` on the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`](crate::SyncError::NotConnected)
    /// unless the state is `connected`.
    pub fn subscribe(&self, topic: &str, listener: Listener) -> SyncResult<SubscriptionHandle> {
        self.inner.registry.subscribe(topic, listener)
    }

    /// Connect with `credential`.
    ///
    /// No-op if a connection for the same credential is live or being
    /// established. Otherwise any existing connection is torn down first.
    /// Must be called within a Tokio runtime.
    pub fn connect(&self, credential: Credential) {
        let mut slot = self.inner.slot.lock();
        if slot.credential.as_ref() == Some(&credential)
            && self.inner.state.load() != ConnectionState::Disconnected
        {
            debug!("connect ignored, already connected with this credential");
            return;
        }

        if self.inner.teardown(&mut slot) {
            info!("credential changed, previous push channel torn down");
            self.inner.publish(ConnectionEvent::Disconnected {
                reason: "credential changed".to_string(),
            });
        }
        slot.generation += 1;
        slot.credential = Some(credential.clone());
        self.inner.state.store(ConnectionState::Connecting);

        let generation = slot.generation;
        let inner = Arc::clone(&self.inner);
        slot.task = Some(tokio::spawn(async move {
            inner.run(generation, credential).await;
        }));
    }

    /// Tear the connection down and stop retrying. Idempotent.
    pub fn disconnect(&self) {
        let mut slot = self.inner.slot.lock();
        let was = self.inner.state.load();
        slot.generation += 1;
        self.inner.teardown(&mut slot);
        slot.credential = None;
        self.inner.state.store(ConnectionState::Disconnected);
        drop(slot);

        if was != ConnectionState::Disconnected {
            info!("push channel disconnected");
            self.inner.publish(ConnectionEvent::Disconnected {
                reason: "disconnect requested".to_string(),
            });
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("topics", &self.inner.registry.topic_count())
            .finish_non_exhaustive()
    }
}

impl ManagerInner {
    fn publish(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.slot.lock().generation == generation
    }

    /// Stop the connection task, close the link and invalidate subscriptions.
    ///
    /// Returns whether anything was live.
    fn teardown(&self, slot: &mut Slot) -> bool {
        let mut live = false;
        if let Some(task) = slot.task.take() {
            task.abort();
            live = true;
        }
        if let Some(link) = slot.link.take() {
            link.close();
            live = true;
        }
        self.registry.invalidate();
        live
    }

    /// Make `link` the current link if `generation` is still current.
    fn install(&self, generation: u64, link: &Arc<dyn Link>) -> bool {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            return false;
        }
        if let Some(previous) = slot.link.take() {
            warn!("live link found while installing a new one, closing it");
            previous.close();
            self.registry.invalidate();
        }
        slot.link = Some(Arc::clone(link));
        self.registry.attach(Arc::clone(link));
        self.state.store(ConnectionState::Connected);
        true
    }

    /// Drop the current link after it was lost. Returns false if `generation`
    /// was superseded in the meantime.
    fn release(&self, generation: u64) -> bool {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            return false;
        }
        if let Some(link) = slot.link.take() {
            link.close();
        }
        self.registry.invalidate();
        self.state.store(ConnectionState::Connecting);
        true
    }

    async fn run(self: Arc<Self>, generation: u64, credential: Credential) {
        let mut failures: u32 = 0;

        loop {
            self.publish(ConnectionEvent::Connecting {
                attempt: failures + 1,
            });

            let (inbound_tx, mut inbound_rx) = mpsc::channel(self.config.inbound_capacity);
            match self.connector.open(&credential, inbound_tx).await {
                Ok(link) => {
                    if !self.install(generation, &link) {
                        link.close();
                        return;
                    }
                    failures = 0;
                    info!("push channel connected");
                    self.publish(ConnectionEvent::Connected);

                    let reason = self.pump(generation, &mut inbound_rx).await;
                    if !self.release(generation) {
                        return;
                    }
                    warn!(%reason, "push channel lost");
                    self.publish(ConnectionEvent::Disconnected { reason });
                }
                Err(e) => {
                    if !self.is_current(generation) {
                        return;
                    }
                    failures = failures.saturating_add(1);
                    warn!(attempt = failures, error = %e, "push channel connect failed");
                    self.publish(ConnectionEvent::Error(e.to_string()));
                }
            }

            let delay = self.config.retry_delay;
            self.publish(ConnectionEvent::Retrying {
                attempt: failures,
                delay,
            });
            sleep(delay).await;

            if !self.is_current(generation) {
                return;
            }
        }
    }

    /// Route inbound messages to the registry until the link closes.
    async fn pump(&self, generation: u64, inbound: &mut mpsc::Receiver<Inbound>) -> String {
        while let Some(event) = inbound.recv().await {
            match event {
                Inbound::Message {
                    subscription,
                    topic,
                    body,
                } => {
                    if !self.is_current(generation) {
                        return "superseded".to_string();
                    }
                    let delivery = self.registry.dispatch(&subscription, &body);
                    debug!(
                        %topic,
                        delivered = delivery.delivered,
                        failed = delivery.failed,
                        "message dispatched"
                    );
                }
                Inbound::Closed { reason } => return reason,
            }
        }
        "link dropped its inbound channel".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::transport::BoxFuture;
    use crate::error::SyncError;
    use std::time::Duration;

    struct NeverConnects;

    impl Connector for NeverConnects {
        fn open<'a>(
            &'a self,
            _credential: &'a Credential,
            _inbound: mpsc::Sender<Inbound>,
        ) -> BoxFuture<'a, SyncResult<Arc<dyn Link>>> {
            Box::pin(async { Err(SyncError::Transport("connection refused".into())) })
        }
    }

    fn manager() -> ConnectionManager {
        let config = SyncConfig::default().with_retry_delay(Duration::from_millis(10));
        ConnectionManager::new(Arc::new(NeverConnects), config).unwrap()
    }

    #[test]
    fn test_new_manager_is_disconnected() {
        let manager = manager();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.credential().is_none());
        assert!(!manager.registry().is_attached());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SyncConfig::default().with_retry_delay(Duration::ZERO);
        assert!(ConnectionManager::new(Arc::new(NeverConnects), config).is_err());
    }

    #[test]
    fn test_disconnect_when_disconnected_is_noop() {
        let manager = manager();
        let mut events = manager.events();

        manager.disconnect();
        manager.disconnect();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failures_are_reported_and_retried() {
        let manager = manager();
        let mut events = manager.events();

        manager.connect(Credential::bearer("T1"));
        assert_eq!(manager.state(), ConnectionState::Connecting);

        let mut errors = 0;
        let mut retries = 0;
        while retries < 3 {
            match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
                Ok(Ok(ConnectionEvent::Error(msg))) => {
                    assert!(msg.contains("connection refused"));
                    errors += 1;
                }
                Ok(Ok(ConnectionEvent::Retrying { attempt, delay })) => {
                    retries += 1;
                    assert_eq!(attempt, retries);
                    assert_eq!(delay, Duration::from_millis(10));
                }
                Ok(Ok(_)) => {}
                other => panic!("unexpected event stream state: {other:?}"),
            }
        }

        assert_eq!(errors, 3);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_subscribe_while_connecting_fails() {
        let manager = manager();
        manager.connect(Credential::bearer("T1"));

        let result = manager.subscribe("/devices", crate::registry::listener(|_| Ok(())));
        assert_eq!(result.unwrap_err(), SyncError::NotConnected);

        manager.disconnect();
    }
}

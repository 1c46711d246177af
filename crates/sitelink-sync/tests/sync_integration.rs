//! Synchronization core integration tests.
//!
//! Drives the connection manager, registry, reconciler and live collections
//! end to end against an in-memory connector.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use sitelink_proto::{Device, SubscriptionId, DEVICES_TOPIC};
use sitelink_sync::channel::BoxFuture;
use sitelink_sync::{
    listener, live, ConnectionEvent, ConnectionManager, ConnectionState, Connector, Credential,
    CredentialStore, Inbound, Link, ListenerError, LiveCollection, SeedSource, SyncConfig,
    SyncContext, SyncError, SyncResult,
};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};

// ============================================================================
// Test Helpers - In-memory transport
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    Subscribe(SubscriptionId, String),
    Unsubscribe(SubscriptionId),
}

struct MockLink {
    ops: Arc<Mutex<Vec<Op>>>,
    closed: AtomicBool,
}

impl Link for MockLink {
    fn subscribe(&self, id: &SubscriptionId, topic: &str) -> SyncResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::LinkClosed);
        }
        self.ops
            .lock()
            .push(Op::Subscribe(id.clone(), topic.to_string()));
        Ok(())
    }

    fn unsubscribe(&self, id: &SubscriptionId) -> SyncResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::LinkClosed);
        }
        self.ops.lock().push(Op::Unsubscribe(id.clone()));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct LiveLink {
    link: Arc<MockLink>,
    inbound: mpsc::Sender<Inbound>,
    credential: Credential,
}

/// Connector handing out in-memory links and letting tests push messages.
#[derive(Default)]
struct MockConnector {
    opens: AtomicUsize,
    links: Mutex<Vec<LiveLink>>,
}

impl MockConnector {
    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn current(&self) -> Option<(Arc<MockLink>, mpsc::Sender<Inbound>)> {
        self.links
            .lock()
            .last()
            .map(|l| (Arc::clone(&l.link), l.inbound.clone()))
    }

    fn credentials(&self) -> Vec<Credential> {
        self.links.lock().iter().map(|l| l.credential.clone()).collect()
    }

    fn ops(&self) -> Vec<Op> {
        self.current()
            .map(|(link, _)| link.ops.lock().clone())
            .unwrap_or_default()
    }

    fn live_subscriptions(&self, topic: &str) -> usize {
        let ops = self.ops();
        let opened: Vec<&SubscriptionId> = ops
            .iter()
            .filter_map(|op| match op {
                Op::Subscribe(id, t) if t == topic => Some(id),
                _ => None,
            })
            .collect();
        opened
            .iter()
            .filter(|id| !ops.contains(&Op::Unsubscribe((**id).clone())))
            .count()
    }

    /// Publish `body` on the current link's subscription for `topic`.
    async fn push(&self, topic: &str, body: &str) {
        let (link, inbound) = self.current().expect("no link open");
        let subscription = link
            .ops
            .lock()
            .iter()
            .rev()
            .find_map(|op| match op {
                Op::Subscribe(id, t) if t == topic => Some(id.clone()),
                _ => None,
            })
            .expect("topic not subscribed");
        inbound
            .send(Inbound::Message {
                subscription,
                topic: topic.to_string(),
                body: body.to_string(),
            })
            .await
            .expect("manager stopped reading");
    }

    /// Simulate the server dropping the current link.
    async fn drop_link(&self) {
        let (_, inbound) = self.current().expect("no link open");
        inbound
            .send(Inbound::Closed {
                reason: "server went away".to_string(),
            })
            .await
            .expect("manager stopped reading");
    }
}

impl Connector for MockConnector {
    fn open<'a>(
        &'a self,
        credential: &'a Credential,
        inbound: mpsc::Sender<Inbound>,
    ) -> BoxFuture<'a, SyncResult<Arc<dyn Link>>> {
        Box::pin(async move {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let link = Arc::new(MockLink {
                ops: Arc::new(Mutex::new(Vec::new())),
                closed: AtomicBool::new(false),
            });
            self.links.lock().push(LiveLink {
                link: Arc::clone(&link),
                inbound,
                credential: credential.clone(),
            });
            let link: Arc<dyn Link> = link;
            Ok(link)
        })
    }
}

struct StaticSeed(Value);

impl SeedSource for StaticSeed {
    fn fetch<'a>(&'a self, _path: &'a str) -> BoxFuture<'a, SyncResult<Value>> {
        let value = self.0.clone();
        Box::pin(async move { Ok(value) })
    }
}

fn test_config() -> SyncConfig {
    SyncConfig::default()
        .with_retry_delay(Duration::from_millis(20))
        .with_ping_interval(None)
}

fn manager(connector: &Arc<MockConnector>) -> ConnectionManager {
    let connector: Arc<dyn Connector> = Arc::clone(connector) as Arc<dyn Connector>;
    ConnectionManager::new(connector, test_config()).expect("valid config")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn next_matching(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    pred: impl Fn(&ConnectionEvent) -> bool,
) -> ConnectionEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not received in time")
}

async fn connected_manager(connector: &Arc<MockConnector>) -> ConnectionManager {
    let manager = manager(connector);
    manager.connect(Credential::bearer("T1"));
    wait_until(|| manager.state() == ConnectionState::Connected).await;
    manager
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[tokio::test]
async fn test_connect_is_idempotent_for_same_credential() {
    let connector = Arc::new(MockConnector::default());
    let manager = connected_manager(&connector).await;

    manager.connect(Credential::bearer("T1"));
    manager.connect(Credential::bearer("T1"));
    sleep(Duration::from_millis(50)).await;

    assert_eq!(connector.opens(), 1);
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_credential_change_replaces_link() {
    let connector = Arc::new(MockConnector::default());
    let manager = connected_manager(&connector).await;
    let (first, _) = connector.current().expect("link");

    manager.connect(Credential::bearer("T2"));
    wait_until(|| connector.opens() == 2 && manager.state() == ConnectionState::Connected).await;

    assert!(first.closed.load(Ordering::SeqCst));
    assert_eq!(
        connector.credentials(),
        vec![Credential::bearer("T1"), Credential::bearer("T2")]
    );
}

#[tokio::test]
async fn test_disconnect_then_subscribe_fails() {
    let connector = Arc::new(MockConnector::default());
    let manager = connected_manager(&connector).await;
    let (link, _) = connector.current().expect("link");

    manager.disconnect();

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(link.closed.load(Ordering::SeqCst));
    let err = manager
        .subscribe(DEVICES_TOPIC, listener(|_| Ok(())))
        .unwrap_err();
    assert_eq!(err, SyncError::NotConnected);
}

#[tokio::test]
async fn test_lost_link_is_retried() {
    let connector = Arc::new(MockConnector::default());
    let manager = connected_manager(&connector).await;
    let mut events = manager.events();

    let handle = manager
        .subscribe(DEVICES_TOPIC, listener(|_| Ok(())))
        .expect("subscribe");
    connector.drop_link().await;

    let lost = next_matching(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    assert_eq!(
        lost,
        ConnectionEvent::Disconnected {
            reason: "server went away".to_string()
        }
    );
    assert!(!handle.is_active());

    next_matching(&mut events, |e| *e == ConnectionEvent::Connected).await;
    assert_eq!(connector.opens(), 2);
    assert_eq!(manager.registry().topic_count(), 0);

    // Cancelling a handle from the dead link must not touch the new one
    handle.cancel();
    assert!(connector.ops().is_empty());
}

// ============================================================================
// Topic sharing and fan-out
// ============================================================================

#[tokio::test]
async fn test_shared_topic_single_underlying_subscription() {
    let connector = Arc::new(MockConnector::default());
    let manager = connected_manager(&connector).await;

    let seen = Arc::new(Mutex::new(Vec::<(usize, Value)>::new()));
    let handles: Vec<_> = (0..2)
        .map(|consumer| {
            let seen = Arc::clone(&seen);
            manager
                .subscribe(
                    DEVICES_TOPIC,
                    listener(move |value| {
                        seen.lock().push((consumer, value.clone()));
                        Ok(())
                    }),
                )
                .expect("subscribe")
        })
        .collect();

    assert_eq!(connector.live_subscriptions(DEVICES_TOPIC), 1);
    assert_eq!(manager.registry().consumer_count(DEVICES_TOPIC), 2);

    connector.push(DEVICES_TOPIC, r#"[{"id":1,"status":true}]"#).await;
    wait_until(|| seen.lock().len() == 2).await;

    let seen = seen.lock().clone();
    assert_eq!(seen[0].0, 0);
    assert_eq!(seen[1].0, 1);
    assert_eq!(seen[0].1, serde_json::json!([{"id": 1, "status": true}]));

    for handle in handles {
        handle.cancel();
    }
    assert_eq!(connector.live_subscriptions(DEVICES_TOPIC), 0);
    assert_eq!(manager.registry().topic_count(), 0);
}

#[tokio::test]
async fn test_failing_listener_does_not_starve_others() {
    let connector = Arc::new(MockConnector::default());
    let manager = connected_manager(&connector).await;
    let mut events = manager.events();

    let delivered = Arc::new(AtomicUsize::new(0));
    let _failing = manager
        .subscribe(
            DEVICES_TOPIC,
            listener(|_| Err(ListenerError::Rejected("render failed".into()))),
        )
        .expect("subscribe");
    let counter = Arc::clone(&delivered);
    let _healthy = manager
        .subscribe(
            DEVICES_TOPIC,
            listener(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .expect("subscribe");

    connector.push(DEVICES_TOPIC, "[]").await;

    let failure =
        next_matching(&mut events, |e| matches!(e, ConnectionEvent::ListenerFailed { .. })).await;
    assert_eq!(
        failure,
        ConnectionEvent::ListenerFailed {
            topic: DEVICES_TOPIC.to_string(),
            error: "render failed".to_string(),
        }
    );
    wait_until(|| delivered.load(Ordering::SeqCst) == 1).await;
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_malformed_payload_is_reported_and_dropped() {
    let connector = Arc::new(MockConnector::default());
    let manager = connected_manager(&connector).await;
    let mut events = manager.events();

    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let _handle = manager
        .subscribe(
            DEVICES_TOPIC,
            listener(move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
        )
        .expect("subscribe");

    connector.push(DEVICES_TOPIC, "[{\"id\":").await;

    let event =
        next_matching(&mut events, |e| matches!(e, ConnectionEvent::MalformedPayload { .. })).await;
    assert!(event.is_error());
    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(manager.state(), ConnectionState::Connected);
}

// ============================================================================
// Live collections through the context
// ============================================================================

fn context(connector: &Arc<MockConnector>, seed: Value) -> SyncContext {
    SyncContext::new(CredentialStore::new(), manager(connector), Arc::new(StaticSeed(seed)))
}

#[tokio::test]
async fn test_live_collection_seeds_then_follows_pushes() {
    let connector = Arc::new(MockConnector::default());
    let ctx = context(&connector, serde_json::json!([{"id": 1, "name": "Lobby"}, {"id": 2, "name": "Roof"}]));
    ctx.credentials().set(Credential::bearer("T1")).expect("valid token");
    ctx.bind_session();

    let devices = live::devices(&ctx).expect("mount");
    wait_until(|| devices.is_subscribed()).await;
    assert_eq!(connector.live_subscriptions(DEVICES_TOPIC), 1);

    connector.push(DEVICES_TOPIC, r#"[{"id":2,"name":"Roof","status":true}]"#).await;
    wait_until(|| devices.snapshot().items().len() == 1).await;

    let state = devices.snapshot();
    assert_eq!(state.items(), &[Device::new(2, "Roof").with_status(true)]);
    assert!(!state.has_error());
}

#[tokio::test]
async fn test_live_collection_resubscribes_after_reconnect() {
    let connector = Arc::new(MockConnector::default());
    let ctx = context(&connector, serde_json::json!([]));
    ctx.credentials().set(Credential::bearer("T1")).expect("valid token");

    let devices = live::devices(&ctx).expect("mount");
    wait_until(|| devices.is_subscribed()).await;

    connector.drop_link().await;
    wait_until(|| connector.opens() == 2 && devices.is_subscribed()).await;

    assert_eq!(connector.live_subscriptions(DEVICES_TOPIC), 1);
    connector.push(DEVICES_TOPIC, r#"[{"id":9}]"#).await;
    wait_until(|| devices.snapshot().items().len() == 1).await;
}

#[tokio::test]
async fn test_live_collection_follows_credential_change() {
    let connector = Arc::new(MockConnector::default());
    let ctx = context(&connector, serde_json::json!([]));
    ctx.credentials().set(Credential::bearer("T1")).expect("valid token");

    let devices = live::devices(&ctx).expect("mount");
    wait_until(|| devices.is_subscribed()).await;
    let (first, _) = connector.current().expect("link");
    let mut events = ctx.manager().events();

    ctx.manager().connect(Credential::bearer("T2"));

    let replaced =
        next_matching(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    assert_eq!(
        replaced,
        ConnectionEvent::Disconnected {
            reason: "credential changed".to_string()
        }
    );
    assert!(first.closed.load(Ordering::SeqCst));

    wait_until(|| connector.opens() == 2 && devices.is_subscribed()).await;
    assert_eq!(connector.live_subscriptions(DEVICES_TOPIC), 1);
    assert_eq!(
        connector.credentials(),
        vec![Credential::bearer("T1"), Credential::bearer("T2")]
    );

    connector.push(DEVICES_TOPIC, r#"[{"id":3}]"#).await;
    wait_until(|| devices.snapshot().items().len() == 1).await;
}

#[tokio::test]
async fn test_dropping_last_collection_unsubscribes_and_disconnects() {
    let connector = Arc::new(MockConnector::default());
    let ctx = context(&connector, serde_json::json!([]));
    ctx.credentials().set(Credential::bearer("T1")).expect("valid token");

    let first: LiveCollection<Device> = live::devices(&ctx).expect("mount");
    let second: LiveCollection<Device> = live::devices(&ctx).expect("mount");
    wait_until(|| first.is_subscribed() && second.is_subscribed()).await;
    assert_eq!(connector.live_subscriptions(DEVICES_TOPIC), 1);
    let (link, _) = connector.current().expect("link");

    drop(first);
    assert_eq!(connector.live_subscriptions(DEVICES_TOPIC), 1);
    assert_eq!(ctx.state(), ConnectionState::Connected);

    drop(second);
    assert_eq!(connector.live_subscriptions(DEVICES_TOPIC), 0);
    assert_eq!(ctx.state(), ConnectionState::Disconnected);
    assert!(link.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_sign_out_disconnects_and_blocks_subscribe() {
    let connector = Arc::new(MockConnector::default());
    let ctx = context(&connector, serde_json::json!([]));
    ctx.credentials().set(Credential::bearer("T1")).expect("valid token");
    ctx.bind_session();

    let devices = live::devices(&ctx).expect("mount");
    wait_until(|| devices.is_subscribed()).await;

    ctx.credentials().clear();
    wait_until(|| ctx.state() == ConnectionState::Disconnected).await;

    assert!(!devices.is_subscribed());
    let err = ctx
        .manager()
        .subscribe(DEVICES_TOPIC, listener(|_| Ok(())))
        .unwrap_err();
    assert_eq!(err, SyncError::NotConnected);

    // No reconnect attempts without a credential
    sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.opens(), 1);
}

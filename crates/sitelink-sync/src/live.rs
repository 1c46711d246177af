//! Live collections: what a view mounts to display pushed data.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use sitelink_proto::{validate_topic, Activity, Device, ACTIVITY_TOPIC, DEVICES_TOPIC};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::{ConnectionEvent, ConnectionManager};
use crate::context::{MountGuard, SyncContext};
use crate::error::{SyncError, SyncResult};
use crate::reconciler::{CollectionState, Reconciler};
use crate::registry::SubscriptionHandle;
use crate::seed::seed_collection;

type HandleSlot = Arc<Mutex<Option<SubscriptionHandle>>>;

/// A collection kept current by the push channel for as long as it lives.
///
/// Mounting seeds the collection once over HTTP and subscribes to its topic
/// whenever the connection comes up, resubscribing after every reconnect.
/// Dropping it cancels the subscription and unmounts the view.
pub struct LiveCollection<T> {
    reconciler: Reconciler<T>,
    handle: HandleSlot,
    task: JoinHandle<()>,
    _mount: MountGuard,
}

impl<T> LiveCollection<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Mount a collection following `topic`, seeded from `seed_path` if given.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTopic`] for a malformed topic.
    pub fn mount(ctx: &SyncContext, topic: &str, seed_path: Option<&str>) -> SyncResult<Self> {
        validate_topic(topic)?;

        let reconciler = Reconciler::new(topic);
        let handle: HandleSlot = Arc::new(Mutex::new(None));
        // Subscribe to events before mounting so the first Connected is seen
        let events = ctx.manager().events();
        let mount = ctx.mount();

        let seed = {
            let source = Arc::clone(ctx.seed());
            let reconciler = reconciler.clone();
            let path = seed_path.map(str::to_string);
            async move {
                if let Some(path) = path {
                    let result = seed_collection::<T>(source.as_ref(), &path).await;
                    reconciler.apply_seed(result);
                }
            }
        };
        let follow = follow_topic(
            ctx.manager().clone(),
            reconciler.clone(),
            Arc::clone(&handle),
            events,
        );
        let task = tokio::spawn(async move {
            tokio::join!(seed, follow);
        });

        Ok(Self {
            reconciler,
            handle,
            task,
            _mount: mount,
        })
    }
}

impl<T> LiveCollection<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Topic this collection follows.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.reconciler.topic()
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> CollectionState<T> {
        self.reconciler.snapshot()
    }

    /// Receiver notified on every change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<CollectionState<T>> {
        self.reconciler.watch()
    }

    /// Whether the collection holds a live subscription right now.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(SubscriptionHandle::is_active)
    }
}

impl<T> Drop for LiveCollection<T> {
    fn drop(&mut self) {
        let handle = self.handle.lock().take();
        drop(handle);
        self.task.abort();
    }
}

impl<T> std::fmt::Debug for LiveCollection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveCollection")
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

/// Device list on [`DEVICES_TOPIC`], seeded from `/devices`.
///
/// # Errors
///
/// See [`LiveCollection::mount`].
pub fn devices(ctx: &SyncContext) -> SyncResult<LiveCollection<Device>> {
    LiveCollection::mount(ctx, DEVICES_TOPIC, Some("/devices"))
}

/// Activity feed on [`ACTIVITY_TOPIC`], seeded from `/activities`.
///
/// # Errors
///
/// See [`LiveCollection::mount`].
pub fn activities(ctx: &SyncContext) -> SyncResult<LiveCollection<Activity>> {
    LiveCollection::mount(ctx, ACTIVITY_TOPIC, Some("/activities"))
}

async fn follow_topic<T>(
    manager: ConnectionManager,
    reconciler: Reconciler<T>,
    handle: HandleSlot,
    mut events: broadcast::Receiver<ConnectionEvent>,
) where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    ensure_subscribed(&manager, &reconciler, &handle);

    loop {
        match events.recv().await {
            Ok(ConnectionEvent::Connected) => ensure_subscribed(&manager, &reconciler, &handle),
            Ok(ConnectionEvent::Disconnected { .. }) => {
                let stale = {
                    let mut slot = handle.lock();
                    if slot.as_ref().is_some_and(SubscriptionHandle::is_active) {
                        None
                    } else {
                        slot.take()
                    }
                };
                drop(stale);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                debug!(topic = reconciler.topic(), skipped, "connection events lagged");
                ensure_subscribed(&manager, &reconciler, &handle);
            }
            Err(RecvError::Closed) => return,
        }
    }
}

fn ensure_subscribed<T>(manager: &ConnectionManager, reconciler: &Reconciler<T>, handle: &HandleSlot)
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let mut slot = handle.lock();
    if slot.as_ref().is_some_and(SubscriptionHandle::is_active) {
        return;
    }
    let topic = reconciler.topic();
    let stale = match manager.subscribe(topic, reconciler.listener()) {
        Ok(fresh) => {
            debug!(topic, "live collection subscribed");
            slot.replace(fresh)
        }
        Err(SyncError::NotConnected) => slot.take(),
        Err(e) => {
            warn!(topic, error = %e, "live collection failed to subscribe");
            slot.take()
        }
    };
    drop(slot);
    drop(stale);
}

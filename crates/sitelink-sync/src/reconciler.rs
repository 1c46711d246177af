//! Per-collection state reconciliation.
//!
//! A collection starts empty, may be seeded once from the HTTP API, and is
//! then replaced wholesale by every push message. Once a push has landed the
//! seed is stale by definition, so a late seed result is discarded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{ListenerError, SyncError};
use crate::registry::{listener, Listener};

/// Where the current items came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Nothing received yet.
    Empty,
    /// Initial HTTP fetch.
    Seed,
    /// Push channel message.
    Push,
}

/// Snapshot of a live collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionState<T> {
    /// `None` until a seed or push has been applied.
    pub items: Option<Vec<T>>,
    /// When `items` was last replaced.
    pub last_refreshed: Option<DateTime<Utc>>,
    /// Error from the seed fetch, cleared by the next push.
    pub seed_error: Option<SyncError>,
    /// Origin of `items`.
    pub origin: Origin,
}

impl<T> Default for CollectionState<T> {
    fn default() -> Self {
        Self {
            items: None,
            last_refreshed: None,
            seed_error: None,
            origin: Origin::Empty,
        }
    }
}

impl<T> CollectionState<T> {
    /// Nothing received and no error yet.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.items.is_none() && self.seed_error.is_none()
    }

    /// Current items (empty if none received).
    #[must_use]
    pub fn items(&self) -> &[T] {
        self.items.as_deref().unwrap_or_default()
    }

    /// Whether the seed failed and no push has replaced it since.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.seed_error.is_some()
    }
}

/// Holds the displayed state of one collection and notifies watchers.
pub struct Reconciler<T> {
    topic: String,
    state: Arc<watch::Sender<CollectionState<T>>>,
}

impl<T> Clone for Reconciler<T> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> std::fmt::Debug for Reconciler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Reconciler")
            .field("topic", &self.topic)
            .field("origin", &state.origin)
            .field("items", &state.items.as_ref().map(Vec::len))
            .finish()
    }
}

impl<T> Reconciler<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty reconciler for `topic`.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        let (state, _) = watch::channel(CollectionState::default());
        Self {
            topic: topic.into(),
            state: Arc::new(state),
        }
    }

    /// Topic this collection follows.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Apply the result of the initial fetch.
    ///
    /// Returns whether the state changed.
    pub fn apply_seed(&self, result: Result<Vec<T>, SyncError>) -> bool {
        let topic = &self.topic;
        self.state.send_if_modified(|state| {
            if state.origin == Origin::Push {
                debug!(%topic, "seed arrived after push, discarded");
                return false;
            }
            match result {
                Ok(items) => {
                    state.items = Some(items);
                    state.seed_error = None;
                    state.origin = Origin::Seed;
                    state.last_refreshed = Some(Utc::now());
                }
                Err(e) => {
                    warn!(%topic, error = %e, "initial fetch failed");
                    state.seed_error = Some(e);
                }
            }
            true
        })
    }

    /// Replace the collection with a pushed list, verbatim.
    pub fn apply_push(&self, items: Vec<T>) {
        self.state.send_modify(|state| {
            state.items = Some(items);
            state.seed_error = None;
            state.origin = Origin::Push;
            state.last_refreshed = Some(Utc::now());
        });
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> CollectionState<T> {
        self.state.borrow().clone()
    }

    /// Receiver notified on every change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<CollectionState<T>> {
        self.state.subscribe()
    }
}

impl<T> Reconciler<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// A registry listener that decodes `Vec<T>` and applies it as a push.
    ///
    /// Payloads of the wrong shape are rejected and leave the state untouched.
    #[must_use]
    pub fn listener(&self) -> Listener {
        let reconciler = self.clone();
        listener(move |value: &Value| {
            let items = Vec::<T>::deserialize(value)
                .map_err(|e| ListenerError::Decode(e.to_string()))?;
            reconciler.apply_push(items);
            Ok(())
        })
    }
}

//! Shared synchronization context.
//!
//! One [`SyncContext`] is built per session and handed to every view that
//! needs live data. Views hold a [`MountGuard`] while mounted: the first
//! mount opens the push channel and the last one to go closes it again.
//! [`SyncContext::bind_session`] ties the channel to the credential store, so
//! signing out or letting the credential expire disconnects immediately.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::channel::{ConnectionManager, ConnectionState, WsConnector};
use crate::config::SyncConfig;
use crate::credential::{Credential, CredentialStore};
use crate::error::SyncResult;
use crate::seed::{HttpSeedClient, SeedSource};

struct ContextInner {
    credentials: CredentialStore,
    manager: ConnectionManager,
    seed: Arc<dyn SeedSource>,
    mounts: Mutex<usize>,
    session: Mutex<Option<JoinHandle<()>>>,
}

impl ContextInner {
    fn mount(&self) {
        let mut mounts = self.mounts.lock();
        *mounts += 1;
        if *mounts == 1 {
            debug!("first view mounted");
            if let Some(credential) = self.credentials.current() {
                self.manager.connect(credential);
            }
        }
    }

    fn unmount(&self) {
        let mut mounts = self.mounts.lock();
        *mounts = mounts.saturating_sub(1);
        if *mounts == 0 {
            debug!("last view unmounted");
            self.manager.disconnect();
        }
    }

    fn on_credential(&self, credential: Option<&Credential>) {
        match credential {
            Some(credential) if credential.is_expired() => {
                info!("session credential expired");
                self.credentials.clear();
            }
            Some(credential) => {
                // Same lock order as mount/unmount: mounts, then the manager slot
                let mounts = self.mounts.lock();
                if *mounts > 0 {
                    self.manager.connect(credential.clone());
                }
            }
            None => self.manager.disconnect(),
        }
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if let Some(task) = self.session.get_mut().take() {
            task.abort();
        }
        self.manager.disconnect();
    }
}

/// Service object shared by all views of a session.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct SyncContext {
    inner: Arc<ContextInner>,
}

impl SyncContext {
    /// Assemble a context from its parts.
    #[must_use]
    pub fn new(
        credentials: CredentialStore,
        manager: ConnectionManager,
        seed: Arc<dyn SeedSource>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                credentials,
                manager,
                seed,
                mounts: Mutex::new(0),
                session: Mutex::new(None),
            }),
        }
    }

    /// Context talking WebSocket to `server_url` and HTTP to `api_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL or the configuration is invalid.
    pub fn connect_to(
        server_url: &str,
        api_url: &str,
        credentials: CredentialStore,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        let connector = WsConnector::new(server_url, &config)?;
        let manager = ConnectionManager::new(Arc::new(connector), config)?;
        let seed = HttpSeedClient::new(api_url, credentials.clone())?;
        Ok(Self::new(credentials, manager, Arc::new(seed)))
    }

    /// The session credential store.
    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    /// The connection manager.
    #[must_use]
    pub fn manager(&self) -> &ConnectionManager {
        &self.inner.manager
    }

    /// Source of initial collection state.
    #[must_use]
    pub fn seed(&self) -> &Arc<dyn SeedSource> {
        &self.inner.seed
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.manager.state()
    }

    /// Number of mounted views.
    #[must_use]
    pub fn mount_count(&self) -> usize {
        *self.inner.mounts.lock()
    }

    /// Register a mounted view. Keep the guard for as long as the view lives.
    ///
    /// Must be called within a Tokio runtime.
    pub fn mount(&self) -> MountGuard {
        self.inner.mount();
        MountGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Follow the credential store: connect when a credential appears while
    /// views are mounted, disconnect as soon as it is cleared or expires.
    ///
    /// Replaces any previous binding. Must be called within a Tokio runtime.
    pub fn bind_session(&self) {
        let weak = Arc::downgrade(&self.inner);
        let changes = self.inner.credentials.watch();
        let task = tokio::spawn(follow_session(weak, changes));
        if let Some(previous) = self.inner.session.lock().replace(task) {
            previous.abort();
        }
    }

    /// Stop following the session and disconnect.
    pub fn shutdown(&self) {
        if let Some(task) = self.inner.session.lock().take() {
            task.abort();
        }
        self.inner.manager.disconnect();
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("state", &self.state())
            .field("mounts", &self.mount_count())
            .finish_non_exhaustive()
    }
}

async fn follow_session(
    context: Weak<ContextInner>,
    mut changes: watch::Receiver<Option<Credential>>,
) {
    loop {
        let credential = changes.borrow_and_update().clone();
        {
            let Some(inner) = context.upgrade() else {
                return;
            };
            inner.on_credential(credential.as_ref());
        }

        let expires_in = credential
            .as_ref()
            .and_then(Credential::expires_at)
            .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO));

        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            () = sleep_for(expires_in) => {
                let Some(inner) = context.upgrade() else {
                    return;
                };
                // Reading an expired credential clears it, which wakes us up
                let _ = inner.credentials.current();
            }
        }
    }
}

async fn sleep_for(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

/// Keeps a view counted as mounted. Dropping the last guard disconnects.
#[must_use = "dropping the guard unmounts the view"]
pub struct MountGuard {
    inner: Arc<ContextInner>,
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        self.inner.unmount();
    }
}

impl std::fmt::Debug for MountGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountGuard").finish_non_exhaustive()
    }
}

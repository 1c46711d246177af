//! Transport abstraction for the push channel.
//!
//! A [`Connector`] opens authenticated [`Link`]s. A link carries subscribe and
//! unsubscribe requests out and reports [`Inbound`] events back through the
//! channel handed to `open`. Reconnection is not the transport's job; the
//! connection manager calls `open` again.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sitelink_proto::SubscriptionId;
use tokio::sync::mpsc;

use crate::credential::Credential;
use crate::error::SyncResult;

/// Boxed future used by dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Events flowing from a link to the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A message on an underlying subscription.
    Message {
        /// Subscription the message belongs to.
        subscription: SubscriptionId,
        /// Topic the message was published on.
        topic: String,
        /// JSON-encoded payload text.
        body: String,
    },
    /// The link is gone. Always the last event of a link.
    Closed {
        /// Reason for closure.
        reason: String,
    },
}

/// One live, authenticated connection to the push server.
///
/// All methods are non-blocking. After [`Link::close`] every other method
/// fails with [`SyncError::LinkClosed`](crate::SyncError::LinkClosed).
pub trait Link: Send + Sync {
    /// Open an underlying subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is closed.
    fn subscribe(&self, id: &SubscriptionId, topic: &str) -> SyncResult<()>;

    /// Close an underlying subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is closed.
    fn unsubscribe(&self, id: &SubscriptionId) -> SyncResult<()>;

    /// Tear the link down. Idempotent.
    fn close(&self);
}

/// Opens links to the push server.
pub trait Connector: Send + Sync {
    /// Connect and authenticate with `credential`.
    ///
    /// The credential is presented once, at connect time. Inbound events of
    /// the new link are delivered on `inbound`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or the
    /// credential is rejected.
    fn open<'a>(
        &'a self,
        credential: &'a Credential,
        inbound: mpsc::Sender<Inbound>,
    ) -> BoxFuture<'a, SyncResult<Arc<dyn Link>>>;
}

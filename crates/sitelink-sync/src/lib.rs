//! # sitelink-sync
//!
//! Real-time synchronization core of the sitelink building dashboard.
//!
//! One authenticated push channel per session carries topic subscriptions for
//! every mounted view. The pieces:
//!
//! - [`CredentialStore`]: the session credential the channel authenticates with
//! - [`ConnectionManager`]: owns the single link, retries at a fixed delay
//! - [`SubscriptionRegistry`]: one underlying subscription per topic, fanned
//!   out to every consumer
//! - [`Reconciler`]: seed once over HTTP, then replace wholesale on every push
//! - [`SyncContext`] and [`LiveCollection`]: what views mount
//!
//! ## Example
//!
//! ```rust,no_run
//! use sitelink_sync::{live, Credential, CredentialStore, SyncConfig, SyncContext};
//!
//! # async fn example() -> Result<(), sitelink_sync::SyncError> {
//! let credentials = CredentialStore::new();
//! let ctx = SyncContext::connect_to(
//!     "wss://building.example.com/push",
//!     "https://building.example.com/api",
//!     credentials.clone(),
//!     SyncConfig::default(),
//! )?;
//! ctx.bind_session();
//!
//! credentials.set(Credential::bearer("token"))?;
//! let devices = live::devices(&ctx)?;
//! let mut changes = devices.watch();
//! while changes.changed().await.is_ok() {
//!     println!("{} devices", changes.borrow().items().len());
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channel;
pub mod config;
pub mod context;
pub mod credential;
pub mod error;
pub mod live;
pub mod reconciler;
pub mod registry;
pub mod seed;

pub use channel::{
    ConnectionEvent, ConnectionManager, ConnectionState, Connector, Inbound, Link, WsConnector,
};
pub use config::SyncConfig;
pub use context::{MountGuard, SyncContext};
pub use credential::{Credential, CredentialStore};
pub use error::{ListenerError, SyncError, SyncResult};
pub use live::LiveCollection;
pub use reconciler::{CollectionState, Origin, Reconciler};
pub use registry::{listener, Delivery, Listener, SubscriptionHandle, SubscriptionRegistry};
pub use seed::{seed_collection, HttpSeedClient, SeedSource};

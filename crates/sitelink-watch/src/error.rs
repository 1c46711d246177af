//! Error types for sitelink-watch.

use sitelink_sync::SyncError;
use thiserror::Error;

/// Errors raised by the watcher outside the sync core.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Configuration could not be read or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// No credential was supplied.
    #[error("no credential: pass --token or set SITELINK_TOKEN")]
    MissingToken,

    /// Error from the synchronization core.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Result type alias for watcher operations.
pub type WatchResult<T> = Result<T, WatchError>;

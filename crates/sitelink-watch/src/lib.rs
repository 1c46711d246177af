//! # sitelink-watch
//!
//! Terminal watcher for live building data. Mounts the device list and the
//! activity feed through the synchronization core and prints every change.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod render;

pub use config::{Feed, WatchConfig};
pub use error::{WatchError, WatchResult};

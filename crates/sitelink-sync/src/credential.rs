//! Session credential source.
//!
//! The store holds at most one bearer credential. It is set on login success,
//! cleared on logout, and cleared lazily when an expired credential is read.
//! Observers (the session binding in [`crate::context`]) follow changes
//! through a `watch` channel.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};

/// An opaque bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Wrap a bearer token.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    /// Attach an expiry instant.
    #[must_use]
    pub const fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// The raw token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// When the credential expires, if known.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the credential is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether the credential is expired now.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Value for an `Authorization` header.
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn validate(&self) -> SyncResult<()> {
        if self.token.trim().is_empty() {
            return Err(SyncError::InvalidCredential(
                "token cannot be empty".to_string(),
            ));
        }
        if self.token.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(SyncError::InvalidCredential(
                "token cannot contain whitespace or control characters".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Process-wide credential store with explicit lifecycle.
///
/// Cloning yields another handle to the same slot.
#[derive(Clone)]
pub struct CredentialStore {
    slot: Arc<watch::Sender<Option<Credential>>>,
}

impl CredentialStore {
    /// Create an empty store (signed out).
    #[must_use]
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Store the credential obtained at login.
    ///
    /// Observers are only notified when the credential actually changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is empty or contains whitespace.
    pub fn set(&self, credential: Credential) -> SyncResult<()> {
        credential.validate()?;
        let changed = self.slot.send_if_modified(|slot| {
            if slot.as_ref() == Some(&credential) {
                return false;
            }
            *slot = Some(credential);
            true
        });
        if changed {
            info!("session credential set");
        }
        Ok(())
    }

    /// Forget the credential (logout).
    pub fn clear(&self) {
        let cleared = self.slot.send_if_modified(|slot| slot.take().is_some());
        if cleared {
            info!("session credential cleared");
        }
    }

    /// Read the current credential.
    ///
    /// An expired credential is cleared and reported as absent.
    #[must_use]
    pub fn current(&self) -> Option<Credential> {
        let credential = self.slot.borrow().clone()?;
        if credential.is_expired() {
            debug!("stored credential has expired");
            self.clear();
            return None;
        }
        Some(credential)
    }

    /// Whether a valid credential is present.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.current().is_some()
    }

    /// Observe credential changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<Credential>> {
        self.slot.subscribe()
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("signed_in", &self.slot.borrow().is_some())
            .finish()
    }
}

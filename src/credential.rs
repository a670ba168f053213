//! Credentials and credential change notifications.
//!
//! The connection layer never acquires or persists credentials. It reads the
//! current token from a [`CredentialStore`] and reacts to explicit change
//! events published through it.
//!
//! # Example
//!
//! ```ignore
//! let store = CredentialStore::new();
//! orchestrator.watch_credentials(&store);
//!
//! store.set(Credential::new(token));   // login / rotation → reinitialize
//! store.clear();                       // logout → disconnect everything
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

// ============================================================================
// Credential
// ============================================================================

/// An opaque bearer token.
///
/// `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Arc<str>);

impl Credential {
    /// Wraps a token.
    #[inline]
    #[must_use]
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(Arc::from(token.as_ref()))
    }

    /// Returns the raw token.
    #[inline]
    #[must_use]
    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} bytes>)", self.0.len())
    }
}

// ============================================================================
// CredentialStore
// ============================================================================

/// Holds the current credential and broadcasts changes.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct CredentialStore {
    tx: Arc<watch::Sender<Option<Credential>>>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("present", &self.tx.borrow().is_some())
            .finish()
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Creates a store holding `credential`.
    #[must_use]
    pub fn with_credential(credential: Credential) -> Self {
        let (tx, _rx) = watch::channel(Some(credential));
        Self { tx: Arc::new(tx) }
    }

    /// Returns the current credential.
    #[inline]
    #[must_use]
    pub fn current(&self) -> Option<Credential> {
        self.tx.borrow().clone()
    }

    /// Stores a new credential. No-op if it equals the current one.
    pub fn set(&self, credential: Credential) {
        let changed = self.tx.send_if_modified(|current| {
            if current.as_ref() == Some(&credential) {
                false
            } else {
                *current = Some(credential);
                true
            }
        });
        if changed {
            debug!("Credential updated");
        }
    }

    /// Removes the credential. No-op if already empty.
    pub fn clear(&self) {
        let changed = self.tx.send_if_modified(|current| current.take().is_some());
        if changed {
            debug!("Credential cleared");
        }
    }

    /// Subscribes to credential changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.tx.subscribe()
    }
}

// ============================================================================
// Tests
// ============================================================================

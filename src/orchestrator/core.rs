//! Connection orchestrator.
//!
//! The [`ConnectionOrchestrator`] owns the named sessions, folds their
//! published states into one signal for the UI and reacts to credential
//! changes. It reads session status only through each session's public
//! handle; it never touches session internals.
//!
//! # Lifecycle
//!
//! Create one orchestrator per application, call
//! [`initialize`](ConnectionOrchestrator::initialize) on login and
//! [`disconnect`](ConnectionOrchestrator::disconnect) on logout. With
//! [`watch_credentials`](ConnectionOrchestrator::watch_credentials) a token
//! rotation tears the sessions down and reconnects them with the new token,
//! and clearing the token disconnects everything.
//!
//! # Example
//!
//! ```ignore
//! let orchestrator = ConnectionOrchestrator::builder()
//!     .chat_endpoint("wss://example.com/hubs/chat")
//!     .notifications_endpoint("wss://example.com/hubs/notifications")
//!     .build()?;
//!
//! orchestrator.on_connectivity_change(|name, online| {
//!     println!("{name}: {}", if online { "online" } else { "offline" });
//! });
//!
//! let status = orchestrator
//!     .initialize(Credential::new(token), InitOptions::default())
//!     .await?;
//! assert!(status.is_connected());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channels::{ChatChannel, NotificationChannel};
use crate::credential::{Credential, CredentialStore};
use crate::error::{Error, Result};
use crate::identifiers::{HandlerId, SessionName};
use crate::session::subscription::{HandlerRegistry, invoke_isolated};
use crate::session::{ConnectionSession, ConnectionState, StateHandler};

use super::builder::OrchestratorBuilder;
use super::status::{InitOptions, OrchestratorStatus, aggregate};

// ============================================================================
// Handler Types
// ============================================================================

/// Callback for an error absorbed by a named session.
pub type SessionErrorHandler = Arc<dyn Fn(&SessionName, &Error) + Send + Sync>;

/// Callback for a session going online (`true`) or offline (`false`).
pub type ConnectivityHandler = Arc<dyn Fn(&SessionName, bool) + Send + Sync>;

// ============================================================================
// Types
// ============================================================================

/// Shared orchestrator internals.
pub(crate) struct OrchestratorInner {
    /// Sessions by name. Fixed at construction.
    sessions: FxHashMap<SessionName, ConnectionSession>,

    /// Sessions enabled by the last `initialize()`. `None` when torn down.
    enabled: Mutex<Option<InitOptions>>,

    /// Last reported connectivity per session.
    online: Mutex<FxHashMap<SessionName, bool>>,

    state_handlers: Mutex<HandlerRegistry<StateHandler>>,
    error_handlers: Mutex<HandlerRegistry<SessionErrorHandler>>,
    connectivity_handlers: Mutex<HandlerRegistry<ConnectivityHandler>>,

    /// Aggregated state.
    state_tx: watch::Sender<ConnectionState>,

    /// Serializes `initialize()` and `disconnect()`.
    lifecycle: AsyncMutex<()>,

    /// Cancelled by `disconnect()` before it waits for `lifecycle`, so a
    /// running `initialize()` gives the lock up.
    teardown: Mutex<CancellationToken>,

    /// Cancels the running credential watch.
    credential_watch: Mutex<Option<CancellationToken>>,
}

// ============================================================================
// ConnectionOrchestrator
// ============================================================================

/// Owner of the chat and notification sessions.
///
/// Cheap to clone; all clones share the same sessions.
#[derive(Clone)]
pub struct ConnectionOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl fmt::Debug for ConnectionOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOrchestrator")
            .field("sessions", &self.inner.sessions.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionOrchestrator - Constructor
// ============================================================================

impl ConnectionOrchestrator {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Wraps already-created sessions.
    pub(crate) fn from_sessions(sessions: Vec<ConnectionSession>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Arc::new(OrchestratorInner {
            sessions: sessions
                .into_iter()
                .map(|session| (session.name().clone(), session))
                .collect(),
            enabled: Mutex::new(None),
            online: Mutex::new(FxHashMap::default()),
            state_handlers: Mutex::new(HandlerRegistry::default()),
            error_handlers: Mutex::new(HandlerRegistry::default()),
            connectivity_handlers: Mutex::new(HandlerRegistry::default()),
            state_tx,
            lifecycle: AsyncMutex::new(()),
            teardown: Mutex::new(CancellationToken::new()),
            credential_watch: Mutex::new(None),
        });

        for session in inner.sessions.values() {
            let weak = Arc::downgrade(&inner);
            let name = session.name().clone();
            session.on_state_change(move |state| {
                if let Some(inner) = weak.upgrade() {
                    inner.session_state_changed(&name, state);
                }
            });

            let weak = Arc::downgrade(&inner);
            let name = session.name().clone();
            session.on_error(move |error| {
                if let Some(inner) = weak.upgrade() {
                    inner.session_failed(&name, error);
                }
            });
        }

        debug!(sessions = inner.sessions.len(), "Orchestrator created");
        Self { inner }
    }
}

// ============================================================================
// ConnectionOrchestrator - Lifecycle
// ============================================================================

impl ConnectionOrchestrator {
    /// Connects every enabled session with `credential`.
    ///
    /// Sessions that are not enabled are disconnected. An enabled session
    /// already running with a different credential is torn down first.
    /// Resolves once every enabled session has either connected or given
    /// up; the aggregated state is `Connected` if at least one did and
    /// `Failed` only if all of them failed. Per-session failures reach
    /// [`on_error`](Self::on_error) handlers.
    ///
    /// A concurrent [`disconnect`](Self::disconnect) aborts the call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no session is enabled or an enabled
    /// session has no configured endpoint, and [`Error::Disconnected`] if
    /// a disconnect aborted the call.
    pub async fn initialize(
        &self,
        credential: Credential,
        options: InitOptions,
    ) -> Result<OrchestratorStatus> {
        let inner = &self.inner;

        if !options.any_enabled() {
            return Err(Error::config(
                "initialize() needs at least one enabled session",
            ));
        }
        for name in [SessionName::CHAT, SessionName::NOTIFICATIONS] {
            if is_enabled(&options, name) && !inner.sessions.contains_key(&SessionName::new(name)) {
                return Err(Error::config(format!(
                    "Session {name} is enabled but has no endpoint. Configure it on the builder."
                )));
            }
        }

        let teardown = inner.teardown.lock().clone();
        let _lifecycle = inner.lifecycle.lock().await;
        if teardown.is_cancelled() {
            return Err(Error::Disconnected);
        }
        *inner.enabled.lock() = Some(options);

        let (mut targets, idle): (Vec<_>, Vec<_>) = inner
            .sessions
            .values()
            .partition(|session| is_enabled(&options, session.name().as_str()));
        targets.sort_by(|a, b| a.name().cmp(b.name()));

        let stale = targets.iter().filter(|session| {
            session.state() != ConnectionState::Disconnected
                && session.credential().as_ref() != Some(&credential)
        });
        join_all(idle.iter().chain(stale).map(|session| session.disconnect())).await;

        for session in &targets {
            session.set_credential(Some(credential.clone()));
        }

        info!(sessions = targets.len(), "Initializing sessions");
        let connects = join_all(targets.iter().map(|session| session.connect()));
        let results = tokio::select! {
            biased;
            () = teardown.cancelled() => {
                info!("Initialization aborted by disconnect");
                return Err(Error::Disconnected);
            }
            results = connects => results,
        };
        for (session, result) in targets.iter().zip(results) {
            if let Err(e) = result {
                warn!(session = %session.name(), error = %e, "Session did not connect");
            }
        }

        inner.publish();
        let status = self.status();
        info!(state = %status.state, "Orchestrator initialized");
        Ok(status)
    }

    /// Disconnects every session. Idempotent.
    ///
    /// Aborts an `initialize()` that is still connecting.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        std::mem::take(&mut *inner.teardown.lock()).cancel();
        let _lifecycle = inner.lifecycle.lock().await;

        *inner.enabled.lock() = None;
        join_all(inner.sessions.values().map(|session| session.disconnect())).await;
        for session in inner.sessions.values() {
            session.set_credential(None);
        }

        inner.publish();
        info!("Orchestrator disconnected");
    }

    /// Reconnects the enabled sessions with a new credential.
    ///
    /// No-op if the orchestrator is not initialized.
    ///
    /// # Errors
    ///
    /// See [`initialize`](Self::initialize).
    pub async fn reinitialize(&self, credential: Credential) -> Result<Option<OrchestratorStatus>> {
        let Some(options) = *self.inner.enabled.lock() else {
            debug!("Credential changed while not initialized, ignoring");
            return Ok(None);
        };
        self.initialize(credential, options).await.map(Some)
    }

    /// Follows `store`: reinitializes on rotation, disconnects on removal.
    ///
    /// Replaces any previous watch.
    pub fn watch_credentials(&self, store: &CredentialStore) {
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.credential_watch.lock().replace(token.clone()) {
            previous.cancel();
        }

        let mut changes = store.subscribe();
        let weak: Weak<OrchestratorInner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let mut rotation: Option<JoinHandle<()>> = None;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }

                let credential = changes.borrow_and_update().clone();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let orchestrator = ConnectionOrchestrator { inner };

                match credential {
                    Some(credential) => {
                        info!("Credential rotated, reinitializing sessions");
                        if let Some(previous) = rotation.take() {
                            previous.abort();
                        }
                        rotation = Some(tokio::spawn(async move {
                            if let Err(e) = orchestrator.reinitialize(credential).await {
                                warn!(error = %e, "Reinitialization failed");
                            }
                        }));
                    }
                    None => {
                        info!("Credential removed, disconnecting sessions");
                        orchestrator.disconnect().await;
                    }
                }
            }
            debug!("Credential watch stopped");
        });
    }

    /// Stops following the credential store.
    pub fn unwatch_credentials(&self) {
        if let Some(token) = self.inner.credential_watch.lock().take() {
            token.cancel();
        }
    }
}

// ============================================================================
// ConnectionOrchestrator - Accessors
// ============================================================================

impl ConnectionOrchestrator {
    /// Returns the aggregated state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.aggregate_state()
    }

    /// Returns a consolidated snapshot.
    #[must_use]
    pub fn status(&self) -> OrchestratorStatus {
        let mut sessions: Vec<_> = self
            .inner
            .sessions
            .values()
            .map(ConnectionSession::status)
            .collect();
        sessions.sort_by(|a, b| a.name.cmp(&b.name));

        OrchestratorStatus {
            state: self.inner.aggregate_state(),
            sessions,
        }
    }

    /// Subscribes to aggregated state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Returns the session called `name`.
    #[must_use]
    pub fn session(&self, name: &str) -> Option<&ConnectionSession> {
        self.inner.sessions.get(&SessionName::new(name))
    }

    /// Returns the chat channel, if configured.
    #[must_use]
    pub fn chat(&self) -> Option<ChatChannel> {
        self.session(SessionName::CHAT).cloned().map(ChatChannel::new)
    }

    /// Returns the notification channel, if configured.
    #[must_use]
    pub fn notifications(&self) -> Option<NotificationChannel> {
        self.session(SessionName::NOTIFICATIONS)
            .cloned()
            .map(NotificationChannel::new)
    }
}

// ============================================================================
// ConnectionOrchestrator - Handlers
// ============================================================================

impl ConnectionOrchestrator {
    /// Registers a callback for aggregated state changes.
    pub fn on_state_change<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.inner.state_handlers.lock().add(Arc::new(handler))
    }

    /// Registers a callback for errors absorbed by any session.
    pub fn on_error<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&SessionName, &Error) + Send + Sync + 'static,
    {
        self.inner.error_handlers.lock().add(Arc::new(handler))
    }

    /// Registers a callback for a session going online or offline.
    pub fn on_connectivity_change<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&SessionName, bool) + Send + Sync + 'static,
    {
        self.inner.connectivity_handlers.lock().add(Arc::new(handler))
    }

    /// Removes a callback. Returns `true` if it was registered.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let inner = &self.inner;
        inner.state_handlers.lock().remove(id)
            || inner.error_handlers.lock().remove(id)
            || inner.connectivity_handlers.lock().remove(id)
    }
}

// ============================================================================
// OrchestratorInner
// ============================================================================

impl OrchestratorInner {
    fn aggregate_state(&self) -> ConnectionState {
        let Some(options) = *self.enabled.lock() else {
            return ConnectionState::Disconnected;
        };
        aggregate(
            self.sessions
                .values()
                .filter(|session| is_enabled(&options, session.name().as_str()))
                .map(ConnectionSession::state),
        )
    }

    /// Publishes the aggregated state and notifies handlers if it changed.
    fn publish(&self) {
        let state = self.aggregate_state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if !changed {
            return;
        }

        debug!(%state, "Aggregated state changed");
        let handlers = self.state_handlers.lock().snapshot();
        for handler in handlers {
            if let Err(e) = invoke_isolated("stateChange", || {
                handler(state);
                Ok(())
            }) {
                warn!(error = %e, "Orchestrator handler failed");
            }
        }
    }

    fn session_state_changed(&self, name: &SessionName, state: ConnectionState) {
        let online = state == ConnectionState::Connected;
        let flipped = {
            let mut known = self.online.lock();
            let previous = known.insert(name.clone(), online).unwrap_or(false);
            previous != online
        };

        if flipped {
            info!(session = %name, online, "Session connectivity changed");
            let handlers = self.connectivity_handlers.lock().snapshot();
            for handler in handlers {
                if let Err(e) = invoke_isolated("connectivityChange", || {
                    handler(name, online);
                    Ok(())
                }) {
                    warn!(error = %e, "Orchestrator handler failed");
                }
            }
        }

        self.publish();
    }

    fn session_failed(&self, name: &SessionName, error: &Error) {
        let handlers = self.error_handlers.lock().snapshot();
        for handler in handlers {
            if let Err(e) = invoke_isolated("error", || {
                handler(name, error);
                Ok(())
            }) {
                warn!(error = %e, "Orchestrator handler failed");
            }
        }
    }
}

fn is_enabled(options: &InitOptions, name: &str) -> bool {
    match name {
        SessionName::CHAT => options.enable_chat,
        SessionName::NOTIFICATIONS => options.enable_notifications,
        _ => false,
    }
}

// ============================================================================
// Tests
// ============================================================================

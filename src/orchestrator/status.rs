//! Aggregated status across sessions.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

use crate::session::{ConnectionState, SessionStatus};

// ============================================================================
// InitOptions
// ============================================================================

/// Which sessions `initialize()` brings up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitOptions {
    /// Connect the chat session.
    pub enable_chat: bool,
    /// Connect the notification session.
    pub enable_notifications: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            enable_chat: true,
            enable_notifications: true,
        }
    }
}

impl InitOptions {
    /// Only the chat session.
    #[inline]
    #[must_use]
    pub fn chat_only() -> Self {
        Self {
            enable_chat: true,
            enable_notifications: false,
        }
    }

    /// Only the notification session.
    #[inline]
    #[must_use]
    pub fn notifications_only() -> Self {
        Self {
            enable_chat: false,
            enable_notifications: true,
        }
    }

    /// Returns `true` if at least one session is enabled.
    #[inline]
    #[must_use]
    pub fn any_enabled(&self) -> bool {
        self.enable_chat || self.enable_notifications
    }
}

// ============================================================================
// OrchestratorStatus
// ============================================================================

/// Consolidated snapshot of every session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    /// Aggregated state over the enabled sessions.
    pub state: ConnectionState,
    /// Per-session snapshots, ordered by name.
    pub sessions: Vec<SessionStatus>,
}

impl OrchestratorStatus {
    /// Returns `true` if at least one enabled session is connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Returns the snapshot for `name`.
    #[must_use]
    pub fn session(&self, name: &str) -> Option<&SessionStatus> {
        self.sessions.iter().find(|s| s.name.as_str() == name)
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// Folds per-session states into one.
///
/// | Sessions | Result |
/// |----------|--------|
/// | none | `Disconnected` |
/// | any `Connected` | `Connected` |
/// | any `Reconnecting` | `Reconnecting` |
/// | any `Connecting` | `Connecting` |
/// | all failed, some circuit-open | `CircuitOpen` |
/// | all failed | `Failed` |
/// | otherwise | `Disconnected` |
#[must_use]
pub fn aggregate<I>(states: I) -> ConnectionState
where
    I: IntoIterator<Item = ConnectionState>,
{
    let states: Vec<ConnectionState> = states.into_iter().collect();
    let any = |wanted: ConnectionState| states.contains(&wanted);

    if states.is_empty() {
        ConnectionState::Disconnected
    } else if any(ConnectionState::Connected) {
        ConnectionState::Connected
    } else if any(ConnectionState::Reconnecting) {
        ConnectionState::Reconnecting
    } else if any(ConnectionState::Connecting) {
        ConnectionState::Connecting
    } else if states.iter().all(|s| s.is_settled_failure()) {
        if any(ConnectionState::CircuitOpen) {
            ConnectionState::CircuitOpen
        } else {
            ConnectionState::Failed
        }
    } else {
        ConnectionState::Disconnected
    }
}

// ============================================================================
// Tests
// ============================================================================

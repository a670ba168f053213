//! Session state, status snapshot and metrics.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::SystemTime;

use serde::Serialize;

use crate::identifiers::SessionName;
use crate::resilience::CircuitState;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a session.
///
/// ```text
/// Disconnected ──connect()──► Connecting ──open + probe ok──► Connected
///                                 │  ▲                           │
///                         failure │  │ retry delay   close / unhealthy
///                                 ▼  │                           ▼
///     Failed ◄──budget spent── Reconnecting ◄────────────────────┘
///
/// CircuitOpen: reported while the breaker is Open.
/// Disconnected: reached from any state via disconnect().
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// Idle. Initial state and the result of `disconnect()`.
    #[default]
    Disconnected,
    /// First attempt of a cycle in progress.
    Connecting,
    /// Channel open and acknowledged.
    Connected,
    /// Retrying after a failure or a lost connection.
    Reconnecting,
    /// Retry budget spent. Needs an explicit `connect()`.
    Failed,
    /// Attempts blocked by an open circuit breaker.
    CircuitOpen,
}

impl ConnectionState {
    /// Returns `true` while an attempt cycle is running.
    #[inline]
    #[must_use]
    pub fn is_connecting(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    /// Returns `true` for states that need an explicit `connect()`.
    #[inline]
    #[must_use]
    pub fn is_settled_failure(self) -> bool {
        matches!(self, Self::Failed | Self::CircuitOpen)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::CircuitOpen => "circuit-open",
        };
        f.write_str(name)
    }
}

// ============================================================================
// SessionMetrics
// ============================================================================

/// Cumulative counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    /// Channel open attempts.
    pub connection_attempts: u64,
    /// Attempts that reached `Connected`.
    pub successful_connections: u64,
    /// Attempts that failed.
    pub failed_attempts: u64,
    /// Connections lost after being established.
    pub reconnections: u64,
    /// Calls delivered, directly or from the queue.
    pub messages_sent: u64,
    /// Inbound events accepted.
    pub messages_received: u64,
    /// Operations that entered the outbound queue.
    pub operations_queued: u64,
    /// Queued operations that ran out of attempts.
    pub operations_exhausted: u64,
    /// Inbound events dropped as duplicates.
    pub duplicates_suppressed: u64,
    /// Subscriber callbacks that failed.
    pub handler_errors: u64,
    /// Text of the most recent error.
    pub last_error: Option<String>,
    /// When the session last reached `Connected`.
    pub last_connected_at: Option<SystemTime>,
}

// ============================================================================
// SessionStatus
// ============================================================================

/// Point-in-time snapshot of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Session name.
    pub name: SessionName,
    /// Reported state.
    pub state: ConnectionState,
    /// Circuit breaker state.
    pub circuit_state: CircuitState,
    /// Failures counted by the circuit breaker.
    pub circuit_failures: u32,
    /// Operations waiting in the outbound queue.
    pub queued_count: usize,
    /// When the health monitor last evaluated the channel.
    pub last_health_check: Option<SystemTime>,
    /// Counters.
    pub metrics: SessionMetrics,
}

impl SessionStatus {
    /// Returns `true` if the session is connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

// ============================================================================
// Tests
// ============================================================================

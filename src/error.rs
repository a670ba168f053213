//! Error types for the real-time connection layer.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use realtime_link::{Error, Result};
//!
//! async fn example(chat: &ChatChannel) -> Result<()> {
//!     match chat.send_private_message("user-42", "hello").await {
//!         Err(Error::OperationExhausted { .. }) => { /* show retry banner */ }
//!         other => { other?; }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::TransportClosed`], [`Error::RetriesExhausted`] |
//! | Gating | [`Error::CircuitOpen`], [`Error::NotConnected`], [`Error::Disconnected`] |
//! | Queue | [`Error::QueueCapacityExceeded`], [`Error::OperationExhausted`] |
//! | Calls | [`Error::RequestTimeout`], [`Error::Remote`], [`Error::Protocol`] |
//! | Subscribers | [`Error::Handler`] |
//! | External | [`Error::Json`], [`Error::WebSocket`], [`Error::Url`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when orchestrator or session configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Channel could not be opened.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Opening the channel or the initial liveness probe took too long.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The transport channel closed underneath an operation.
    #[error("Transport closed: {reason}")]
    TransportClosed {
        /// Reason reported by the transport, if any.
        reason: String,
    },

    /// The bounded retry budget of a connect cycle ran out.
    ///
    /// The session settles into `Failed` and requires an explicit
    /// `connect()` to start again from attempt 0.
    #[error("Connection failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made in the cycle.
        attempts: u32,
        /// Display text of the last attempt's error.
        last_error: String,
    },

    // ========================================================================
    // Gating Errors
    // ========================================================================
    /// Attempt refused by an open circuit breaker without touching the transport.
    #[error("Circuit breaker open, retry in {retry_after_ms}ms")]
    CircuitOpen {
        /// Milliseconds until the breaker admits a half-open trial.
        retry_after_ms: u64,
    },

    /// Send attempted while the session is not ready and queuing is disabled.
    #[error("Session {session} is not connected")]
    NotConnected {
        /// Session name.
        session: String,
    },

    /// Operation abandoned because the session was explicitly disconnected.
    #[error("Session disconnected")]
    Disconnected,

    // ========================================================================
    // Queue Errors
    // ========================================================================
    /// Oldest queued operation evicted because the queue hit its cap.
    #[error("Outbound queue capacity exceeded ({capacity})")]
    QueueCapacityExceeded {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// Queued operation failed `max_attempts` times.
    #[error("Operation {method} exhausted after {attempts} attempts")]
    OperationExhausted {
        /// Remote method name.
        method: String,
        /// Attempts made.
        attempts: u32,
    },

    // ========================================================================
    // Call Errors
    // ========================================================================
    /// Remote call did not answer within the per-call timeout.
    #[error("Call {method} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Remote method name.
        method: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The remote end answered with an error.
    #[error("Remote error ({code}): {message}")]
    Remote {
        /// Error code from the server.
        code: String,
        /// Error message from the server.
        message: String,
    },

    /// Protocol violation or unexpected frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Subscriber Errors
    // ========================================================================
    /// A subscriber callback failed. Always contained, never propagated.
    #[error("Handler for '{event}' failed: {message}")]
    Handler {
        /// Event name being dispatched.
        event: String,
        /// Failure description.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Endpoint URL error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Completion handle dropped before resolving.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a transport closed error.
    #[inline]
    pub fn transport_closed(reason: impl Into<String>) -> Self {
        Self::TransportClosed {
            reason: reason.into(),
        }
    }

    /// Creates a retries exhausted error.
    #[inline]
    pub fn retries_exhausted(attempts: u32, last_error: &Error) -> Self {
        Self::RetriesExhausted {
            attempts,
            last_error: last_error.to_string(),
        }
    }

    /// Creates a circuit open rejection.
    #[inline]
    pub fn circuit_open(retry_after_ms: u64) -> Self {
        Self::CircuitOpen { retry_after_ms }
    }

    /// Creates a not connected error.
    #[inline]
    pub fn not_connected(session: impl Into<String>) -> Self {
        Self::NotConnected {
            session: session.into(),
        }
    }

    /// Creates a queue capacity error.
    #[inline]
    pub fn queue_capacity_exceeded(capacity: usize) -> Self {
        Self::QueueCapacityExceeded { capacity }
    }

    /// Creates an operation exhausted error.
    #[inline]
    pub fn operation_exhausted(method: impl Into<String>, attempts: u32) -> Self {
        Self::OperationExhausted {
            method: method.into(),
            attempts,
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(method: impl Into<String>, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            method: method.into(),
            timeout_ms,
        }
    }

    /// Creates a remote error.
    #[inline]
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a handler error.
    #[inline]
    pub fn handler(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            event: event.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::TransportClosed { .. }
                | Self::RetriesExhausted { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the failure came from the transport rather than the
    /// remote application.
    ///
    /// Transport failures feed the circuit breaker and make a call eligible
    /// for the outbound queue. Remote errors are definitive answers.
    #[inline]
    #[must_use]
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::TransportClosed { .. }
                | Self::RequestTimeout { .. }
                | Self::WebSocket(_)
                | Self::ChannelClosed(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.is_transport_failure()
            || matches!(
                self,
                Self::CircuitOpen { .. } | Self::NotConnected { .. } | Self::RetriesExhausted { .. }
            )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::connection("refused");
        assert_eq!(err.to_string(), "Connection failed: refused");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing chat endpoint");
        assert_eq!(err.to_string(), "Configuration error: missing chat endpoint");
    }

    #[test]
    fn test_circuit_open_display() {
        let err = Error::circuit_open(1500);
        assert_eq!(err.to_string(), "Circuit breaker open, retry in 1500ms");
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::connection_timeout(15_000);
        let call_timeout = Error::request_timeout("SendPrivateMessage", 10_000);
        let other_err = Error::connection("test");

        assert!(timeout_err.is_timeout());
        assert!(call_timeout.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_transport_failure_excludes_remote_errors() {
        assert!(Error::transport_closed("gone").is_transport_failure());
        assert!(Error::request_timeout("Ping", 10).is_transport_failure());
        assert!(!Error::remote("forbidden", "not a member").is_transport_failure());
        assert!(!Error::Disconnected.is_transport_failure());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("test").is_connection_error());
        assert!(Error::connection_timeout(1000).is_connection_error());
        assert!(Error::transport_closed("eof").is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::circuit_open(10).is_recoverable());
        assert!(!Error::operation_exhausted("JoinGroup", 3).is_recoverable());
        assert!(!Error::config("test").is_recoverable());
    }

    #[test]
    fn test_retries_exhausted_keeps_last_error() {
        let last = Error::connection_timeout(15_000);
        let err = Error::retries_exhausted(15, &last);
        assert!(err.to_string().contains("15 attempts"));
        assert!(err.to_string().contains("15000ms"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_from_url_error() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: Error = url_err.into();
        assert!(matches!(err, Error::Url(_)));
    }
}

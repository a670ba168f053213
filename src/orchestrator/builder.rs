//! Builder pattern for orchestrator configuration.
//!
//! # Example
//!
//! ```ignore
//! use realtime_link::{ConnectionOrchestrator, SessionOptions};
//!
//! let orchestrator = ConnectionOrchestrator::builder()
//!     .chat_endpoint("wss://example.com/hubs/chat")
//!     .notifications_endpoint("wss://example.com/hubs/notifications")
//!     .notification_options(SessionOptions::notifications().with_event_buffer(100))
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::SessionName;
use crate::session::{ConnectionSession, SessionOptions};
use crate::transport::{ChannelFactory, WebSocketConnector};

use super::core::ConnectionOrchestrator;

// ============================================================================
// OrchestratorBuilder
// ============================================================================

/// Builder for a [`ConnectionOrchestrator`].
///
/// Use [`ConnectionOrchestrator::builder()`] to create one.
#[derive(Clone)]
pub struct OrchestratorBuilder {
    /// Chat hub endpoint.
    chat_endpoint: Option<String>,
    /// Notification hub endpoint.
    notifications_endpoint: Option<String>,
    /// Channel factory. Defaults to [`WebSocketConnector`].
    connector: Option<Arc<dyn ChannelFactory>>,
    /// Options for the chat session.
    chat_options: SessionOptions,
    /// Options for the notification session.
    notification_options: SessionOptions,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            chat_endpoint: None,
            notifications_endpoint: None,
            connector: None,
            chat_options: SessionOptions::chat(),
            notification_options: SessionOptions::notifications(),
        }
    }
}

impl fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("chat_endpoint", &self.chat_endpoint)
            .field("notifications_endpoint", &self.notifications_endpoint)
            .field("custom_connector", &self.connector.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// OrchestratorBuilder Implementation
// ============================================================================

impl OrchestratorBuilder {
    /// Creates a builder with no endpoints.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the chat hub endpoint (`ws://` or `wss://`).
    #[inline]
    #[must_use]
    pub fn chat_endpoint(mut self, url: impl Into<String>) -> Self {
        self.chat_endpoint = Some(url.into());
        self
    }

    /// Sets the notification hub endpoint (`ws://` or `wss://`).
    #[inline]
    #[must_use]
    pub fn notifications_endpoint(mut self, url: impl Into<String>) -> Self {
        self.notifications_endpoint = Some(url.into());
        self
    }

    /// Replaces the default WebSocket connector.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn ChannelFactory>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets the chat session options.
    #[inline]
    #[must_use]
    pub fn chat_options(mut self, options: SessionOptions) -> Self {
        self.chat_options = options;
        self
    }

    /// Sets the notification session options.
    #[inline]
    #[must_use]
    pub fn notification_options(mut self, options: SessionOptions) -> Self {
        self.notification_options = options;
        self
    }

    /// Builds the orchestrator with validation.
    ///
    /// Sessions are created, disconnected, for each configured endpoint.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no endpoint is set
    /// - [`Error::Config`] if an endpoint is not a `ws://`/`wss://` URL
    /// - [`Error::Config`] if session options are invalid
    pub fn build(self) -> Result<ConnectionOrchestrator> {
        if self.chat_endpoint.is_none() && self.notifications_endpoint.is_none() {
            return Err(Error::config(
                "At least one endpoint is required. Use .chat_endpoint() or .notifications_endpoint().\n\
                 Example: ConnectionOrchestrator::builder().chat_endpoint(\"wss://example.com/hubs/chat\")",
            ));
        }

        let connector = self
            .connector
            .unwrap_or_else(|| WebSocketConnector::new().shared());

        let mut sessions = Vec::with_capacity(2);
        if let Some(raw) = &self.chat_endpoint {
            sessions.push(ConnectionSession::new(
                SessionName::chat(),
                validate_endpoint(SessionName::CHAT, raw)?,
                Arc::clone(&connector),
                self.chat_options,
            )?);
        }
        if let Some(raw) = &self.notifications_endpoint {
            sessions.push(ConnectionSession::new(
                SessionName::notifications(),
                validate_endpoint(SessionName::NOTIFICATIONS, raw)?,
                Arc::clone(&connector),
                self.notification_options,
            )?);
        }

        Ok(ConnectionOrchestrator::from_sessions(sessions))
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Parses an endpoint and checks its scheme.
fn validate_endpoint(session: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| Error::config(format!("Invalid {session} endpoint '{raw}': {e}")))?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        scheme => Err(Error::config(format!(
            "The {session} endpoint must use ws:// or wss://, got {scheme}://"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================

//! WebSocket channel factory.
//!
//! Dials a `ws://` or `wss://` endpoint and wraps the resulting stream in a
//! [`WebSocketChannel`].
//!
//! # Connection Flow
//!
//! 1. Append the credential as an `access_token` query parameter
//! 2. Perform the WebSocket handshake (bounded by the handshake timeout)
//! 3. Spawn the channel event loop
//!
//! The session adds its own liveness probe on top; a successful handshake
//! alone does not make a session `Connected`.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tracing::{debug, info};
use url::Url;

use crate::credential::Credential;
use crate::error::{Error, Result};

use super::{ChannelFactory, OpenedChannel, WebSocketChannel};

// ============================================================================
// Constants
// ============================================================================

/// Default WebSocket handshake timeout.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Query parameter carrying the credential.
const ACCESS_TOKEN_PARAM: &str = "access_token";

// ============================================================================
// WebSocketConnector
// ============================================================================

/// [`ChannelFactory`] producing [`WebSocketChannel`]s.
///
/// # Example
///
/// ```ignore
/// let connector = WebSocketConnector::new();
/// let opened = connector.open(&endpoint, &credential).await?;
/// let pong = opened.channel.invoke("Ping", vec![]).await?;
/// ```
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    /// Handshake timeout.
    handshake_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketConnector {
    /// Creates a connector with the default handshake timeout.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Returns the connector as a shared factory.
    #[inline]
    #[must_use]
    pub fn shared(self) -> Arc<dyn ChannelFactory> {
        Arc::new(self)
    }

    /// Builds the dial URL for an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the scheme is not `ws` or `wss`.
    pub fn dial_url(endpoint: &Url, credential: &Credential) -> Result<Url> {
        match endpoint.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::config(format!(
                    "Unsupported endpoint scheme '{other}', expected ws or wss"
                )));
            }
        }

        let mut url = endpoint.clone();
        url.query_pairs_mut()
            .append_pair(ACCESS_TOKEN_PARAM, credential.token());
        Ok(url)
    }
}

#[async_trait]
impl ChannelFactory for WebSocketConnector {
    async fn open(&self, endpoint: &Url, credential: &Credential) -> Result<OpenedChannel> {
        let url = Self::dial_url(endpoint, credential)?;

        debug!(host = ?endpoint.host_str(), path = endpoint.path(), "Dialing WebSocket endpoint");

        let (ws_stream, response) = timeout(self.handshake_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| Error::connection_timeout(self.handshake_timeout.as_millis() as u64))?
            .map_err(|e| Error::connection(format!("WebSocket handshake failed: {e}")))?;

        info!(status = %response.status(), path = endpoint.path(), "WebSocket connection established");

        let (channel, events) = WebSocketChannel::new(ws_stream);

        Ok(OpenedChannel {
            channel: Arc::new(channel),
            events,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

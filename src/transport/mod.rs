//! Transport layer.
//!
//! The connection layer consumes exactly one capability from its
//! environment: open a bidirectional channel to an endpoint, given a
//! credential, yielding a stream of named events and accepting named remote
//! calls. That capability is the [`ChannelFactory`] trait.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                         ┌──────────────────┐
//! │  ConnectionSession   │                         │  Server hub      │
//! │                      │   invoke(method, args)  │                  │
//! │  Arc<dyn Channel>  ──┼────────────────────────►│                  │
//! │                      │   ChannelEvent stream   │                  │
//! │  events rx         ◄─┼─────────────────────────┤                  │
//! └──────────────────────┘                         └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | JSON-over-WebSocket channel and its event loop |
//! | `connector` | [`ChannelFactory`] that dials WebSocket endpoints |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::credential::Credential;
use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket channel and event loop.
pub mod connection;

/// WebSocket channel factory.
pub mod connector;

/// Scripted in-memory transport for tests.
#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::WebSocketChannel;
pub use connector::WebSocketConnector;

// ============================================================================
// ChannelEvent
// ============================================================================

/// Something the transport reports to the channel's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A named event pushed by the server.
    Message {
        /// Event name.
        name: String,
        /// Event payload.
        payload: Value,
    },

    /// The channel closed. No further events follow.
    Closed {
        /// Human-readable reason.
        reason: String,
    },
}

// ============================================================================
// Channel
// ============================================================================

/// A live bidirectional channel.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Invokes a remote method and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::TransportClosed`] if the channel is closed
    /// - [`crate::Error::Remote`] if the server answered with an error
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value>;

    /// Returns `true` while the transport considers itself open.
    fn is_open(&self) -> bool;

    /// Closes the channel. Idempotent.
    fn close(&self);
}

// ============================================================================
// OpenedChannel
// ============================================================================

/// A freshly opened channel and its ordered event stream.
pub struct OpenedChannel {
    /// Handle for remote calls.
    pub channel: Arc<dyn Channel>,
    /// Inbound events in transport delivery order.
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl fmt::Debug for OpenedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedChannel")
            .field("open", &self.channel.is_open())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ChannelFactory
// ============================================================================

/// Opens channels to an endpoint.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Opens a channel to `endpoint` authenticated with `credential`.
    ///
    /// # Errors
    ///
    /// Returns a transport-level error if the channel cannot be opened.
    async fn open(&self, endpoint: &Url, credential: &Credential) -> Result<OpenedChannel>;
}

//! Realtime Link - Resilient real-time connection layer.
//!
//! This library keeps long-lived, bidirectional message channels (chat and
//! notifications) alive over an unreliable network and an unreliable server.
//!
//! # Architecture
//!
//! ```text
//! ConnectionOrchestrator
//!   ├── ConnectionSession "chat"
//!   │     ├── CircuitBreaker + RetryScheduler   (attempt gating, backoff)
//!   │     ├── OutboundQueue                     (sends while not ready)
//!   │     ├── HealthMonitor                     (heartbeat probes)
//!   │     └── SubscriptionTable                 (event fan-out)
//!   └── ConnectionSession "notifications"
//!         └── ... + Deduplicator                (windowed suppression)
//! ```
//!
//! Key design principles:
//!
//! - Each session runs its lifecycle on one spawned task; state sits behind
//!   short locks never held across an `await`
//! - Every open, probe, call and retry sleep is cancellable
//! - Timeouts feed the same breaker and retry paths as transport failures
//! - Subscriber callbacks are isolated; a failing one never affects others
//!
//! # Quick Start
//!
//! ```no_run
//! use realtime_link::{ConnectionOrchestrator, Credential, InitOptions, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let orchestrator = ConnectionOrchestrator::builder()
//!         .chat_endpoint("wss://example.com/hubs/chat")
//!         .notifications_endpoint("wss://example.com/hubs/notifications")
//!         .build()?;
//!
//!     let status = orchestrator
//!         .initialize(Credential::new("token"), InitOptions::default())
//!         .await?;
//!     println!("state: {}", status.state);
//!
//!     if let Some(chat) = orchestrator.chat() {
//!         chat.send_private_message("user-42", "hello").await?;
//!     }
//!
//!     orchestrator.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`channels`] | Typed chat and notification wrappers |
//! | [`credential`] | Credential and watch-based store |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`orchestrator`] | Multi-session owner and aggregated status |
//! | [`protocol`] | WebSocket frame types and notification envelope |
//! | [`resilience`] | Breaker, backoff, queue, heartbeat, dedup |
//! | [`session`] | Single-channel state machine |
//! | [`transport`] | Channel traits and WebSocket implementation |

// ============================================================================
// Modules
// ============================================================================

/// Typed channel wrappers.
pub mod channels;

/// Credentials and credential change notification.
pub mod credential;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Multi-session orchestration.
///
/// Use [`ConnectionOrchestrator::builder()`] to create an instance.
pub mod orchestrator;

/// WebSocket protocol message types.
pub mod protocol;

/// Resilience primitives.
pub mod resilience;

/// Resilient single-channel sessions.
pub mod session;

/// Transport layer.
///
/// The [`ChannelFactory`] trait is the only capability consumed from the
/// environment.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Channel types
pub use channels::{ChatChannel, ChatMessage, NotificationChannel, Reaction};

// Credential types
pub use credential::{Credential, CredentialStore};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{HandlerId, OperationId, RequestId, SessionName};

// Orchestrator types
pub use orchestrator::{
    ConnectionOrchestrator, InitOptions, OrchestratorBuilder, OrchestratorStatus,
};

// Protocol types
pub use protocol::NotificationEnvelope;

// Resilience types
pub use resilience::{
    CircuitBreaker, CircuitConfig, CircuitState, DedupConfig, Deduplicator, HealthConfig,
    HealthMonitor, OutboundQueue, RetryPolicy, RetryScheduler,
};

// Session types
pub use session::{
    ConnectionSession, ConnectionState, NOTIFICATION_EVENT, SessionMetrics, SessionOptions,
    SessionStatus,
};

// Transport types
pub use transport::{
    Channel, ChannelEvent, ChannelFactory, OpenedChannel, WebSocketChannel, WebSocketConnector,
};
